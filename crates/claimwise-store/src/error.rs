use std::path::PathBuf;

use claimwise_core::ClaimError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error("cannot link {path:?} to a policy number: {reason}")]
    Linkage { path: PathBuf, reason: String },

    #[error("index {name} was built with {persisted}, current embedder is {current}")]
    EmbeddingMismatch {
        name: String,
        persisted: String,
        current: String,
    },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid index {name}: {reason}")]
    InvalidIndex { name: String, reason: String },

    #[error("metadata key `{0}` cannot be used as a filter")]
    UnsupportedFilter(String),

    #[cfg(feature = "lancedb")]
    #[error("lancedb error: {0}")]
    LanceDb(#[from] lancedb::Error),

    #[error("{0}")]
    Other(String),
}
