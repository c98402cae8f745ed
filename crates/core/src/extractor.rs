use crate::error::IngestError;
use crate::models::PageRecord;
use lopdf::Document;
use std::path::Path;

pub trait PdfExtractor {
    type Pages: Iterator<Item = Result<PageRecord, IngestError>>;

    /// Opens `path` and returns its non-blank pages in order, decoded as they are pulled.
    fn pages(&self, path: &Path) -> Result<Self::Pages, IngestError>;

    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, IngestError> {
        self.pages(path)?.collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    type Pages = PdfPages;

    fn pages(&self, path: &Path) -> Result<PdfPages, IngestError> {
        PdfPages::open(path)
    }
}

/// Lazily decodes page text, one page per `next()`, skipping blank pages.
pub struct PdfPages {
    document: Document,
    page_numbers: std::vec::IntoIter<u32>,
    source_file: String,
    path: String,
}

impl PdfPages {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        // non-UTF-8 names are still citable; invalid bytes become U+FFFD
        let source_file = path
            .file_name()
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        let document = Document::load(path).map_err(|error| IngestError::CorruptDocument {
            path: path.display().to_string(),
            reason: error.to_string(),
        })?;

        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();

        Ok(Self {
            document,
            page_numbers: page_numbers.into_iter(),
            source_file,
            path: path.display().to_string(),
        })
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }
}

impl Iterator for PdfPages {
    type Item = Result<PageRecord, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        for page_number in self.page_numbers.by_ref() {
            let text = match self.document.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(error) => {
                    return Some(Err(IngestError::CorruptDocument {
                        path: self.path.clone(),
                        reason: format!("page {page_number}: {error}"),
                    }))
                }
            };

            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            return Some(Ok(PageRecord {
                text: text.to_string(),
                source_file: self.source_file.clone(),
                page_number,
            }));
        }

        None
    }
}
