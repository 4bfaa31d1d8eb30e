use thiserror::Error;

/// Errors surfaced by the similarity and clustering engine.
///
/// Skippable input defects (missing hashes, missing embeddings, too few
/// comparable items) never show up here: they are filtered out where they
/// are found.
#[derive(Debug, Error)]
pub enum Error {
    #[error("photo {0} not found")]
    PhotoNotFound(i64),

    /// A pairwise or partition computation would not fit in memory.
    #[error(
        "out of memory during {operation} ({requested_bytes} bytes requested); \
         retry with a smaller working set"
    )]
    ResourceExhausted {
        operation: &'static str,
        requested_bytes: usize,
    },

    /// The clustering primitive itself failed (malformed matrix and the like).
    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        name: &'static str,
        message: String,
    },

    #[error("clustering pass cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the caller may retry the same operation, typically with a
    /// smaller working set.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::ResourceExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
