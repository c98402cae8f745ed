use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IndexError};
use crate::models::{IndexedVector, Neighbor, Passage};
use crate::traits::PassageIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.jsonl";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    model: String,
    dimensions: Option<usize>,
    created_at: DateTime<Utc>,
}

struct IndexWriter {
    vectors: File,
    manifest: Manifest,
}

#[derive(Default)]
struct Snapshot {
    entries: Vec<IndexedVector>,
    hashes: HashSet<String>,
}

/// Append-only passage store persisted as a manifest plus one JSON line per vector.
///
/// Appends serialise on the writer mutex. Queries read the in-memory snapshot,
/// which is only write-locked while freshly persisted entries are pushed onto it.
pub struct VectorIndex {
    root: PathBuf,
    model: String,
    embedder: Box<dyn Embedder>,
    writer: Mutex<IndexWriter>,
    snapshot: RwLock<Snapshot>,
}

impl VectorIndex {
    pub fn open(path: impl AsRef<Path>, embedder: impl Embedder + 'static) -> Result<Self, IndexError> {
        let root = path.as_ref().to_path_buf();
        let model = embedder.model_name();
        let unavailable = |reason: String| IndexError::Unavailable {
            path: root.display().to_string(),
            reason,
        };

        fs::create_dir_all(&root).map_err(|error| unavailable(error.to_string()))?;

        let manifest_path = root.join(MANIFEST_FILE);
        let mut manifest = if manifest_path.exists() {
            let raw = fs::read_to_string(&manifest_path)
                .map_err(|error| unavailable(format!("unreadable manifest: {error}")))?;
            let manifest: Manifest = serde_json::from_str(&raw)
                .map_err(|error| unavailable(format!("corrupt manifest: {error}")))?;

            if manifest.format_version != FORMAT_VERSION {
                return Err(unavailable(format!(
                    "unsupported format version {} (expected {FORMAT_VERSION})",
                    manifest.format_version
                )));
            }
            if manifest.model != model {
                return Err(unavailable(format!(
                    "index was built with model {} but {model} is configured",
                    manifest.model
                )));
            }
            manifest
        } else {
            let manifest = Manifest {
                format_version: FORMAT_VERSION,
                model: model.clone(),
                dimensions: None,
                created_at: Utc::now(),
            };
            write_manifest(&root, &manifest)?;
            manifest
        };

        let vectors_path = root.join(VECTORS_FILE);
        let mut snapshot = Snapshot::default();
        if vectors_path.exists() {
            let file = File::open(&vectors_path)
                .map_err(|error| unavailable(format!("unreadable vectors: {error}")))?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|error| unavailable(format!("unreadable vectors: {error}")))?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: IndexedVector = serde_json::from_str(&line).map_err(|error| {
                    unavailable(format!("corrupt vector on line {}: {error}", line_no + 1))
                })?;

                let expected = *manifest.dimensions.get_or_insert(entry.embedding.len());
                if entry.embedding.len() != expected {
                    return Err(unavailable(format!(
                        "vector on line {} has dimension {} but the index uses {expected}",
                        line_no + 1,
                        entry.embedding.len()
                    )));
                }

                snapshot.hashes.insert(entry.content_hash.clone());
                snapshot.entries.push(entry);
            }
        }

        let vectors = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&vectors_path)
            .map_err(|error| unavailable(error.to_string()))?;

        info!(
            path = %root.display(),
            model = %model,
            entries = snapshot.entries.len(),
            "vector index opened"
        );

        Ok(Self {
            root,
            model,
            embedder: Box::new(embedder),
            writer: Mutex::new(IndexWriter { vectors, manifest }),
            snapshot: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.read_snapshot()
            .entries
            .first()
            .map(|entry| entry.embedding.len())
    }

    pub fn len(&self) -> usize {
        self.read_snapshot().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.read_snapshot().hashes.contains(content_hash)
    }

    /// Embeds every passage before touching disk, so a failed embedding call appends nothing.
    pub fn add(&self, passages: &[Passage]) -> Result<usize, IndexError> {
        if passages.is_empty() {
            return Ok(0);
        }

        let texts = passages
            .iter()
            .map(|passage| passage.text.as_str())
            .collect::<Vec<_>>();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let mut writer = self.writer.lock().map_err(|_| self.poisoned())?;
        let expected = writer
            .manifest
            .dimensions
            .or_else(|| embeddings.first().map(Vec::len))
            .unwrap_or_default();
        if let Some(bad) = embeddings.iter().find(|embedding| embedding.len() != expected) {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: bad.len(),
            }
            .into());
        }

        let indexed_at = Utc::now();
        let entries = passages
            .iter()
            .zip(embeddings)
            .map(|(passage, embedding)| IndexedVector {
                id: Uuid::new_v4(),
                content_hash: passage.content_hash(),
                indexed_at,
                passage: passage.clone(),
                embedding,
            })
            .collect::<Vec<_>>();

        let mut buffer = String::new();
        for entry in &entries {
            buffer.push_str(&serde_json::to_string(entry)?);
            buffer.push('\n');
        }

        // dimensions land in the manifest before any vector does
        if writer.manifest.dimensions.is_none() {
            let mut manifest = writer.manifest.clone();
            manifest.dimensions = Some(expected);
            write_manifest(&self.root, &manifest)?;
            writer.manifest = manifest;
        }
        append_or_rewind(&mut writer.vectors, buffer.as_bytes())?;

        let added = entries.len();
        let mut snapshot = self.snapshot.write().map_err(|_| self.poisoned())?;
        for entry in entries {
            snapshot.hashes.insert(entry.content_hash.clone());
            snapshot.entries.push(entry);
        }
        debug!(added, total = snapshot.entries.len(), "passages appended");

        Ok(added)
    }

    /// Nearest entries by cosine distance; equal distances keep insertion order.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidArgument(
                "k must be a positive integer".to_string(),
            ));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(text)?;

        let snapshot = self.snapshot.read().map_err(|_| self.poisoned())?;
        if let Some(expected) = snapshot.entries.first().map(|entry| entry.embedding.len()) {
            if query_vector.len() != expected {
                return Err(EmbeddingError::Dimension {
                    expected,
                    actual: query_vector.len(),
                }
                .into());
            }
        }

        let mut ranked = snapshot
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_distance(&query_vector, &entry.embedding)))
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(position, distance)| Neighbor {
                entry: snapshot.entries[position].clone(),
                distance,
            })
            .collect())
    }

    fn read_snapshot(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn poisoned(&self) -> IndexError {
        IndexError::Unavailable {
            path: self.root.display().to_string(),
            reason: "index lock poisoned by a panicked writer".to_string(),
        }
    }
}

impl PassageIndex for VectorIndex {
    fn add(&self, passages: &[Passage]) -> Result<usize, IndexError> {
        VectorIndex::add(self, passages)
    }

    fn query(&self, text: &str, k: usize) -> Result<Vec<Neighbor>, IndexError> {
        VectorIndex::query(self, text, k)
    }

    fn len(&self) -> usize {
        VectorIndex::len(self)
    }

    fn contains(&self, content_hash: &str) -> bool {
        VectorIndex::contains(self, content_hash)
    }
}

/// The vectors file as seen by the append path.
trait AppendLog: Write {
    fn end(&self) -> io::Result<u64>;
    fn rewind_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendLog for File {
    fn end(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends `bytes` and syncs. On failure the log is cut back to its previous
/// length so no partial line survives to break the next open.
fn append_or_rewind<L: AppendLog>(log: &mut L, bytes: &[u8]) -> Result<(), IndexError> {
    let end = log.end()?;
    if let Err(error) = log.write_all(bytes).and_then(|()| log.sync()) {
        if let Err(rewind) = log.rewind_to(end) {
            warn!(
                error = %rewind,
                len = end,
                "could not truncate vectors file after failed append"
            );
        }
        return Err(error.into());
    }
    Ok(())
}

fn write_manifest(root: &Path, manifest: &Manifest) -> Result<(), IndexError> {
    let staged = root.join(format!("{MANIFEST_FILE}.tmp"));
    fs::write(&staged, serde_json::to_vec_pretty(manifest)?)?;
    fs::rename(&staged, root.join(MANIFEST_FILE))?;
    Ok(())
}

/// `1 - cosine similarity`; zero vectors sit at distance 1 from everything.
fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_left * norm_right)
}
