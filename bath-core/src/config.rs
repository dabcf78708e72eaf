use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct BathConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub embedding: EmbeddingConfig,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// "onnx" or "gemini"
    pub backend: String,
    /// Model identifier recorded in the dataset header.
    pub model: String,
    pub dimensions: u32,
    #[serde(default)]
    pub onnx_model_path: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// BERT-style exports take a third `token_type_ids` input; MPNet does not.
    #[serde(default)]
    pub token_type_ids: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Load the model at startup instead of on the first query.
    #[serde(default)]
    pub preload: bool,
}

fn default_max_tokens() -> u32 {
    384
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub path: String,
}

impl DatasetConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: u32,
    pub max_k: u32,
    /// Split "A but not B" queries and penalise similarity to B.
    pub negation: bool,
    pub penalty_weight: f32,
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 1,
            max_k: 20,
            negation: true,
            penalty_weight: 1.0,
            min_score: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
    /// Allow cross-origin calls from any origin.
    pub cors: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            request_timeout_seconds: 30,
            cors: true,
        }
    }
}

impl BathConfig {
    /// Load from a TOML file, then apply `BATH__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("BATH").separator("__"))
            .build()?;
        s.try_deserialize::<Self>()?.validated()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize::<Self>()?.validated()
    }

    /// Reject values that deserialize fine but break ranking or serving.
    fn validated(self) -> Result<Self, ConfigError> {
        let retrieval = &self.retrieval;
        if !retrieval.penalty_weight.is_finite() || retrieval.penalty_weight < 0.0 {
            return Err(ConfigError::Message(format!(
                "retrieval.penalty_weight must be a finite non-negative number, got {}",
                retrieval.penalty_weight
            )));
        }
        if let Some(min_score) = retrieval.min_score.filter(|m| !m.is_finite()) {
            return Err(ConfigError::Message(format!(
                "retrieval.min_score must be finite, got {min_score}"
            )));
        }
        if self.http.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "http.request_timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Expand `~` and `$VAR` in a configured path. Falls back to the raw string
/// when a variable is undefined.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(path),
    }
}
