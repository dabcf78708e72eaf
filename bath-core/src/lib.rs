pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod models;
pub mod onnx_embedder;
pub mod query;
pub mod similarity;

pub use config::BathConfig;
pub use dataset::Dataset;
pub use embeddings::{
    create_backend, BackendConfig, EmbeddingBackend, EmbeddingError, GeminiConfig,
    GeminiEmbeddingClient, OnnxConfig, GEMINI_DIMENSIONS, MINILM_DIMENSIONS, MPNET_DIMENSIONS,
};
pub use error::{RetrievalError, SearchError};
pub use models::{DesignImage, RetrievedImage};
pub use onnx_embedder::OnnxEmbeddingClient;
pub use query::{parse_query, ParsedQuery};
pub use similarity::{cosine_similarity, rank, scores, top_k, Scored, TIE_EPSILON};
