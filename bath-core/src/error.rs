use std::path::PathBuf;

use thiserror::Error;

use crate::embeddings::EmbeddingError;

/// Errors raised while loading the dataset or ranking candidates.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Dataset is empty")]
    EmptyDataset,

    #[error("Dimension mismatch at image {index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("top-k must be at least 1")]
    InvalidTopK,

    #[error("Query vector is empty, zero-norm or non-finite")]
    DegenerateQuery,

    #[error("Malformed dataset: {0}")]
    MalformedDataset(String),

    #[error(
        "Dataset was built with {dataset_model} ({dataset_dimensions}-dim) \
         but the embedder is {embedder_model} ({embedder_dimensions}-dim)"
    )]
    ModelMismatch {
        dataset_model: String,
        dataset_dimensions: usize,
        embedder_model: String,
        embedder_dimensions: usize,
    },

    #[error("Dataset IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Dataset decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Dataset encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Failure of a full search: either the query could not be embedded or the
/// ranking step rejected its inputs. Never carries partial results.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

impl SearchError {
    /// Short machine-readable tag for API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::Embedding(_) => "embedding",
            SearchError::Retrieval(_) => "retrieval",
        }
    }
}
