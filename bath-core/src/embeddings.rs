//! Embeddings module: text to fixed-length vectors
//!
//! Provides an `EmbeddingBackend` trait with implementations for:
//! - **ONNX**: local sentence-transformer inference (`all-mpnet-base-v2`, 768-dim,
//!   or `all-MiniLM-L6-v2`, 384-dim)
//! - **Gemini**: cloud embeddings via the Gemini API (768-dim)
//!
//! Dataset captions and queries must go through the same backend and model,
//! otherwise their cosine scores are not comparable.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::EmbeddingConfig;

/// Default Gemini embedding dimensions
pub const GEMINI_DIMENSIONS: usize = 768;

/// `all-mpnet-base-v2` embedding dimensions
pub const MPNET_DIMENSIONS: usize = 768;

/// `all-MiniLM-L6-v2` embedding dimensions
pub const MINILM_DIMENSIONS: usize = 384;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a document (dataset caption).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a search query. Backends that support task-type hints (e.g. Gemini)
    /// override this to use `RETRIEVAL_QUERY` instead of `RETRIEVAL_DOCUMENT`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    /// Returns the embedding dimension (e.g., 768 or 384).
    fn dimensions(&self) -> usize;

    /// Model identifier, recorded in the dataset header.
    fn model(&self) -> &str;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Reject input that no backend can embed.
pub fn validate_input(text: &str) -> Result<(), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    Ok(())
}

// ============================================================================
// Error types
// ============================================================================

/// Task type for embedding API
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    RetrievalDocument,
    RetrievalQuery,
}

/// Embedding generation errors
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Input text is empty")]
    EmptyInput,

    #[error("Input is {tokens} tokens, model limit is {limit}")]
    InputTooLong { tokens: usize, limit: usize },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} embedding attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },

    #[error("ONNX model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("ONNX inference error: {0}")]
    OnnxInference(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Embedding timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

// ============================================================================
// Config types
// ============================================================================

/// Gemini embedding client configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl GeminiConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        Self {
            api_key: api_key.unwrap_or_else(api_key_from_env),
            model,
            dimensions,
            max_retries: 0,
            retry_delay_ms: 1000,
            timeout_seconds: 30,
        }
    }
}

/// `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY`.
pub fn api_key_from_env() -> String {
    std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GOOGLE_API_KEY"))
        .unwrap_or_default()
}

/// ONNX backend configuration
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub model_name: String,
    pub dimensions: usize,
    pub max_tokens: usize,
    pub token_type_ids: bool,
}

/// Configuration union for the backend factory.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Gemini(GeminiConfig),
    Onnx(OnnxConfig),
}

impl BackendConfig {
    /// Build from the `[embedding]` section. Unknown backend names fall back to ONNX.
    pub fn from_settings(settings: &EmbeddingConfig) -> Self {
        match settings.backend.as_str() {
            "gemini" => BackendConfig::Gemini(GeminiConfig {
                api_key: api_key_from_env(),
                model: settings.model.clone(),
                dimensions: settings.dimensions as usize,
                max_retries: settings.max_retries as usize,
                retry_delay_ms: settings.retry_delay_ms,
                timeout_seconds: settings.timeout_seconds,
            }),
            other => {
                if other != "onnx" {
                    tracing::warn!(backend = other, "Unknown embedding backend, using onnx");
                }
                let (model_path, tokenizer_path) = crate::onnx_embedder::resolve_onnx_paths(
                    &settings.onnx_model_path,
                    &settings.model,
                );
                BackendConfig::Onnx(OnnxConfig {
                    model_path,
                    tokenizer_path,
                    model_name: settings.model.clone(),
                    dimensions: settings.dimensions as usize,
                    max_tokens: settings.max_tokens as usize,
                    token_type_ids: settings.token_type_ids,
                })
            }
        }
    }

    pub fn model(&self) -> &str {
        match self {
            BackendConfig::Gemini(c) => &c.model,
            BackendConfig::Onnx(c) => &c.model_name,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            BackendConfig::Gemini(c) => c.dimensions,
            BackendConfig::Onnx(c) => c.dimensions,
        }
    }
}

/// Create the appropriate backend from configuration.
///
/// The ONNX backend loads model weights here, so this can block for a while.
pub fn create_backend(config: BackendConfig) -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
    match config {
        BackendConfig::Gemini(c) => Ok(Box::new(GeminiEmbeddingClient::new(c)?)),
        BackendConfig::Onnx(c) => Ok(Box::new(crate::onnx_embedder::OnnxEmbeddingClient::new(c)?)),
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    model: String,
    content: GeminiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiEmbeddingClient
// ============================================================================

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini embedding client, calls the Gemini Embeddings API.
#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    config: GeminiConfig,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: GeminiConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(config, GEMINI_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: GeminiConfig, base_url: String) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Generate an embedding with a specific task type.
    ///
    /// Retries only when `max_retries > 0`; with the default of zero a failed
    /// call surfaces its own error unchanged.
    pub async fn embed_with_task(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        validate_input(text)?;

        if self.config.max_retries == 0 {
            return self.embed_once(text, task_type).await;
        }

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let attempts = self.config.max_retries + 1;
        Retry::spawn(retry_strategy, || self.embed_once(text, task_type))
            .await
            .map_err(|e| {
                tracing::error!(attempts, error = %e, "All embedding attempts failed");
                EmbeddingError::RetryExhausted {
                    attempts,
                    last: e.to_string(),
                }
            })
    }

    async fn embed_once(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GeminiRequest {
            model: format!("models/{}", self.config.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: Some(task_type),
            output_dimensionality: Some(self.config.dimensions),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            return Err(EmbeddingError::Api { code, message });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let values = gemini_response.embedding.values;

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalQuery).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================
