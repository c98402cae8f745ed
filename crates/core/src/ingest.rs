use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::traits::PassageIndex;
use crate::{
    CorruptPolicy, IngestError, IngestStatus, IngestionOptions, IngestionSummary, Passage,
    SkippedPdf,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// PDFs directly inside `folder`, sorted. Subdirectories are not searched; symlinks are followed.
///
/// A directory entry that cannot be read is an error, not an absent file.
pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.into_path());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub struct IngestionCoordinator<'a, I: ?Sized, E> {
    index: &'a I,
    extractor: E,
    options: IngestionOptions,
}

impl<'a, I> IngestionCoordinator<'a, I, LopdfExtractor>
where
    I: PassageIndex + ?Sized,
{
    pub fn new(index: &'a I, options: IngestionOptions) -> Self {
        Self::with_extractor(index, LopdfExtractor, options)
    }
}

impl<'a, I, E> IngestionCoordinator<'a, I, E>
where
    I: PassageIndex + ?Sized,
    E: PdfExtractor,
{
    pub fn with_extractor(index: &'a I, extractor: E, options: IngestionOptions) -> Self {
        Self {
            index,
            extractor,
            options,
        }
    }

    pub fn ingest_all(&self, staging_dir: &Path) -> Result<IngestionSummary, IngestError> {
        let config = ChunkingConfig::from(&self.options);
        config.validate()?;

        fs::create_dir_all(staging_dir)?;
        let files = discover_pdf_files(staging_dir)?;
        if files.is_empty() {
            info!(staging_dir = %staging_dir.display(), "no pdf files staged");
            return Ok(IngestionSummary::no_files());
        }

        let mut summary = IngestionSummary {
            status: IngestStatus::Ok,
            pdf_count: 0,
            pages_loaded: 0,
            chunks_added: 0,
            skipped_files: Vec::new(),
            message: None,
        };
        let mut seen = HashSet::new();

        for path in files {
            let (page_count, mut passages) = match self.read_pdf(&path, config) {
                Ok(read) => read,
                Err(error @ IngestError::CorruptDocument { .. })
                    if self.options.on_corrupt == CorruptPolicy::Skip =>
                {
                    warn!(path = %path.display(), reason = %error, "skipped pdf");
                    summary.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                    continue;
                }
                Err(error) => return Err(error),
            };

            if self.options.deduplicate {
                passages = self.drop_known(passages, &mut seen);
            }
            let added = self.index.add(&passages)?;

            info!(
                path = %path.display(),
                pages = page_count,
                passages = added,
                "pdf ingested"
            );

            summary.pdf_count += 1;
            summary.pages_loaded += page_count;
            summary.chunks_added += added;
        }

        Ok(summary)
    }

    /// Chunks pages as the extractor decodes them. Nothing reaches the index until
    /// the whole file has been read, so a file that fails midway adds no passages.
    fn read_pdf(
        &self,
        path: &Path,
        config: ChunkingConfig,
    ) -> Result<(usize, Vec<Passage>), IngestError> {
        let mut page_count = 0;
        let mut passages = Vec::new();
        for page in self.extractor.pages(path)? {
            page_count += 1;
            passages.extend(chunk_pages([page?], config)?);
        }
        Ok((page_count, passages))
    }

    fn drop_known(&self, passages: Vec<Passage>, seen: &mut HashSet<String>) -> Vec<Passage> {
        passages
            .into_iter()
            .filter(|passage| {
                let hash = passage.content_hash();
                !self.index.contains(&hash) && seen.insert(hash)
            })
            .collect()
    }
}

/// Ingests every staged PDF with the lopdf extractor.
pub fn ingest_all_pdfs<I>(
    index: &I,
    staging_dir: &Path,
    options: IngestionOptions,
) -> Result<IngestionSummary, IngestError>
where
    I: PassageIndex + ?Sized,
{
    IngestionCoordinator::new(index, options).ingest_all(staging_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::store::VectorIndex;
    use crate::PageRecord;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    /// Serves page texts by file name; any file not listed is corrupt.
    #[derive(Default)]
    struct FakeExtractor {
        documents: HashMap<String, Vec<String>>,
    }

    impl FakeExtractor {
        fn with(mut self, file: &str, pages: &[&str]) -> Self {
            let pages = pages.iter().map(|text| text.to_string()).collect();
            self.documents.insert(file.to_string(), pages);
            self
        }
    }

    impl PdfExtractor for FakeExtractor {
        type Pages = std::vec::IntoIter<Result<PageRecord, IngestError>>;

        fn pages(&self, path: &Path) -> Result<Self::Pages, IngestError> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            let pages = self
                .documents
                .get(&name)
                .ok_or_else(|| IngestError::CorruptDocument {
                    path: path.display().to_string(),
                    reason: "unreadable".to_string(),
                })?;

            let records = pages
                .iter()
                .enumerate()
                .filter(|(_, text)| !text.trim().is_empty())
                .map(|(index, text)| {
                    Ok(PageRecord {
                        text: text.clone(),
                        source_file: name.clone(),
                        page_number: index as u32 + 1,
                    })
                })
                .collect::<Vec<_>>();
            Ok(records.into_iter())
        }
    }

    fn stage(dir: &Path, names: &[&str]) -> Result<(), std::io::Error> {
        for name in names {
            File::create(dir.join(name)).and_then(|mut file| file.write_all(b"%PDF-1.4\n%stub"))?;
        }
        Ok(())
    }

    #[test]
    fn discovery_is_flat_and_case_insensitive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        stage(base, &["b.PDF", "a.pdf", "notes.txt"])?;
        stage(&nested, &["c.pdf"])?;

        let files = discover_pdf_files(base)?;
        let names = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.pdf", "b.PDF"]);
        Ok(())
    }

    #[test]
    fn unreadable_staging_dir_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let result = discover_pdf_files(&root.path().join("gone"));
        assert!(matches!(result, Err(IngestError::Io(_))));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_pdf_is_discovered() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let elsewhere = tempdir()?;
        stage(elsewhere.path(), &["real.pdf"])?;
        std::os::unix::fs::symlink(
            elsewhere.path().join("real.pdf"),
            staging.path().join("notes.pdf"),
        )?;

        let files = discover_pdf_files(staging.path())?;
        assert_eq!(files, vec![staging.path().join("notes.pdf")]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn broken_entry_fails_ingestion_instead_of_reporting_no_files(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        std::os::unix::fs::symlink(
            staging.path().join("missing-target.pdf"),
            staging.path().join("ghost.pdf"),
        )?;

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let result = ingest_all_pdfs(&index, staging.path(), IngestionOptions::default());

        assert!(matches!(result, Err(IngestError::Io(_))));
        assert!(index.is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_name_is_skipped_like_any_corrupt_pdf() -> Result<(), Box<dyn std::error::Error>> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let staging = tempdir()?;
        let store = tempdir()?;
        fs::write(
            staging.path().join(OsStr::from_bytes(b"bad\xff.pdf")),
            b"%PDF-1.4\n%broken",
        )?;
        let options = IngestionOptions {
            on_corrupt: CorruptPolicy::Skip,
            ..Default::default()
        };

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let summary = ingest_all_pdfs(&index, staging.path(), options)?;

        assert_eq!(summary.status, IngestStatus::Ok);
        assert_eq!(summary.pdf_count, 0);
        assert_eq!(summary.skipped_files.len(), 1);
        assert!(index.is_empty());
        Ok(())
    }

    #[test]
    fn page_failure_midway_adds_nothing_from_that_file() -> Result<(), Box<dyn std::error::Error>> {
        struct HalfReadable;

        impl PdfExtractor for HalfReadable {
            type Pages = std::vec::IntoIter<Result<PageRecord, IngestError>>;

            fn pages(&self, path: &Path) -> Result<Self::Pages, IngestError> {
                let first = PageRecord {
                    text: "Readable first page".to_string(),
                    source_file: "half.pdf".to_string(),
                    page_number: 1,
                };
                let broken = IngestError::CorruptDocument {
                    path: path.display().to_string(),
                    reason: "page 2: bad stream".to_string(),
                };
                Ok(vec![Ok(first), Err(broken)].into_iter())
            }
        }

        let staging = tempdir()?;
        let store = tempdir()?;
        stage(staging.path(), &["half.pdf"])?;
        let options = IngestionOptions {
            on_corrupt: CorruptPolicy::Skip,
            ..Default::default()
        };

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let summary = IngestionCoordinator::with_extractor(&index, HalfReadable, options)
            .ingest_all(staging.path())?;

        assert_eq!(summary.skipped_files.len(), 1);
        assert_eq!(summary.pages_loaded, 0);
        assert!(index.is_empty());
        Ok(())
    }

    #[test]
    fn two_page_pdf_yields_four_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        stage(staging.path(), &["lecture.pdf"])?;

        let short = "s".repeat(50);
        let long = "l".repeat(2000);
        let extractor =
            FakeExtractor::default().with("lecture.pdf", &[short.as_str(), long.as_str()]);

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let summary = IngestionCoordinator::with_extractor(&index, extractor, Default::default())
            .ingest_all(staging.path())?;

        assert_eq!(summary.status, IngestStatus::Ok);
        assert_eq!(summary.pdf_count, 1);
        assert_eq!(summary.pages_loaded, 2);
        assert_eq!(summary.chunks_added, 4);
        assert_eq!(index.len(), 4);
        Ok(())
    }

    #[test]
    fn empty_staging_dir_leaves_index_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        index.add(&[Passage {
            text: "already indexed".to_string(),
            source_file: "old.pdf".to_string(),
            page_number: 1,
        }])?;

        let summary = ingest_all_pdfs(&index, staging.path(), IngestionOptions::default())?;

        assert_eq!(summary.status, IngestStatus::NoFiles);
        assert!(summary.message.is_some());
        assert_eq!(index.len(), 1);
        Ok(())
    }

    #[test]
    fn missing_staging_dir_is_created() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = tempdir()?;
        let staging = root.path().join("uploads");
        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;

        let summary = ingest_all_pdfs(&index, &staging, IngestionOptions::default())?;

        assert_eq!(summary.status, IngestStatus::NoFiles);
        assert!(staging.is_dir());
        Ok(())
    }

    #[test]
    fn corrupt_pdf_aborts_by_default() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        stage(staging.path(), &["a_good.pdf", "b_bad.pdf", "c_good.pdf"])?;
        let extractor = FakeExtractor::default()
            .with("a_good.pdf", &["First document text"])
            .with("c_good.pdf", &["Third document text"]);

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let result = IngestionCoordinator::with_extractor(&index, extractor, Default::default())
            .ingest_all(staging.path());

        assert!(matches!(result, Err(IngestError::CorruptDocument { .. })));
        assert_eq!(index.len(), 1);
        Ok(())
    }

    #[test]
    fn corrupt_pdf_is_recorded_when_skipping() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        stage(staging.path(), &["a_good.pdf", "b_bad.pdf", "c_good.pdf"])?;
        let extractor = FakeExtractor::default()
            .with("a_good.pdf", &["First document text"])
            .with("c_good.pdf", &["Third document text", "", "more"]);
        let options = IngestionOptions {
            on_corrupt: CorruptPolicy::Skip,
            ..Default::default()
        };

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let summary = IngestionCoordinator::with_extractor(&index, extractor, options)
            .ingest_all(staging.path())?;

        assert_eq!(summary.pdf_count, 2);
        assert_eq!(summary.pages_loaded, 3);
        assert_eq!(summary.chunks_added, 3);
        assert_eq!(summary.skipped_files.len(), 1);
        assert_eq!(
            summary.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("b_bad.pdf")
        );
        Ok(())
    }

    #[test]
    fn real_extractor_reports_unreadable_pdf() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        fs::write(staging.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let result = ingest_all_pdfs(&index, staging.path(), IngestionOptions::default());

        assert!(matches!(result, Err(IngestError::CorruptDocument { .. })));
        assert!(index.is_empty());
        Ok(())
    }

    #[test]
    fn reingesting_appends_again_unless_deduplicating() -> Result<(), Box<dyn std::error::Error>> {
        let staging = tempdir()?;
        let store = tempdir()?;
        stage(staging.path(), &["cardio.pdf"])?;
        let pages = ["Preload and afterload", "Frank-Starling law"];

        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let blind = IngestionCoordinator::with_extractor(
            &index,
            FakeExtractor::default().with("cardio.pdf", &pages),
            IngestionOptions::default(),
        );
        blind.ingest_all(staging.path())?;
        blind.ingest_all(staging.path())?;
        assert_eq!(index.len(), 4);

        let guarded = IngestionCoordinator::with_extractor(
            &index,
            FakeExtractor::default().with("cardio.pdf", &pages),
            IngestionOptions {
                deduplicate: true,
                ..Default::default()
            },
        );
        let summary = guarded.ingest_all(staging.path())?;
        assert_eq!(summary.pages_loaded, 2);
        assert_eq!(summary.chunks_added, 0);
        assert_eq!(index.len(), 4);
        Ok(())
    }

    #[test]
    fn invalid_chunking_fails_before_touching_files() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let store = tempdir()?;
        let staging = root.path().join("never-created");
        let index = VectorIndex::open(store.path(), CharacterNgramEmbedder::default())?;
        let options = IngestionOptions {
            chunk_size: 100,
            chunk_overlap: 150,
            ..Default::default()
        };

        let result = ingest_all_pdfs(&index, &staging, options);

        assert!(matches!(result, Err(IngestError::Configuration(_))));
        assert!(!staging.exists());
        Ok(())
    }
}
