use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// Text of one non-empty PDF page. Discarded once chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub text: String,
    pub source_file: String,
    pub page_number: u32,
}

/// A bounded span of one page, the unit that gets embedded and retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub source_file: String,
    pub page_number: u32,
}

impl Passage {
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_file.as_bytes());
        hasher.update(self.page_number.to_le_bytes());
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVector {
    pub id: Uuid,
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
    pub passage: Passage,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub entry: IndexedVector,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub page: u32,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub context: String,
    pub citations: Vec<Citation>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    NoFiles,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestionSummary {
    pub status: IngestStatus,
    pub pdf_count: usize,
    pub pages_loaded: usize,
    pub chunks_added: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<SkippedPdf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IngestionSummary {
    pub fn no_files() -> Self {
        Self {
            status: IngestStatus::NoFiles,
            pdf_count: 0,
            pages_loaded: 0,
            chunks_added: 0,
            skipped_files: Vec::new(),
            message: Some("No PDFs found in staging folder.".to_string()),
        }
    }
}

/// What to do when a staged PDF cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub on_corrupt: CorruptPolicy,
    pub deduplicate: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 900,
            chunk_overlap: 150,
            on_corrupt: CorruptPolicy::Abort,
            deduplicate: false,
        }
    }
}
