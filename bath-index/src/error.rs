use std::path::PathBuf;

use bath_core::{EmbeddingError, RetrievalError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog must be a JSON array of records")]
    NotAnArray,

    #[error("No usable records left after cleaning")]
    NothingToIndex,

    #[error("Failed to embed {id}: {source}")]
    Embedding {
        id: String,
        #[source]
        source: EmbeddingError,
    },

    #[error(transparent)]
    Dataset(#[from] RetrievalError),
}
