use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt document {path}: {reason}")]
    CorruptDocument { path: String, reason: String },

    #[error("invalid chunking config: {0}")]
    Configuration(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("embedding service error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    Response { backend: String, details: String },

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("embedding backend {0} returned an empty vector")]
    Empty(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
