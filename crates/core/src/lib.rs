pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod retrieve;
pub mod store;
pub mod traits;

pub use chunking::{chunk_pages, split_text, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_OLLAMA_MODEL,
};
pub use error::{EmbeddingError, IndexError, IngestError};
pub use extractor::{LopdfExtractor, PdfExtractor, PdfPages};
pub use ingest::{discover_pdf_files, ingest_all_pdfs, IngestionCoordinator};
pub use models::{
    Citation, CorruptPolicy, IndexedVector, IngestStatus, IngestionOptions, IngestionSummary,
    Neighbor, PageRecord, Passage, RetrievalResult, SkippedPdf,
};
pub use retrieve::{retrieve_with_citations, Retriever, DEFAULT_TOP_K};
pub use store::VectorIndex;
pub use traits::PassageIndex;
