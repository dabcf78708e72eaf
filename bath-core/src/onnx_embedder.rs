//! ONNX embedding backend: local sentence-transformer inference
//!
//! Uses the `ort` crate for ONNX Runtime and `tokenizers` for WordPiece/BPE
//! tokenization. Produces L2-normalised mean-pooled embeddings entirely offline.

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::embeddings::{validate_input, EmbeddingBackend, EmbeddingError, OnnxConfig};

/// Local ONNX embedding client.
pub struct OnnxEmbeddingClient {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<tokenizers::Tokenizer>,
    model_name: String,
    dimensions: usize,
    max_tokens: usize,
    token_type_ids: bool,
}

impl std::fmt::Debug for OnnxEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingClient")
            .field("model_name", &self.model_name)
            .field("dimensions", &self.dimensions)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl OnnxEmbeddingClient {
    /// Load the ONNX model and tokenizer from the paths in `config`.
    ///
    /// Tokenizer truncation is switched off so that over-long input is reported
    /// as `EmbeddingError::InputTooLong` instead of being silently cut.
    pub fn new(config: OnnxConfig) -> Result<Self, EmbeddingError> {
        if !config.model_path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.model_path.display().to_string(),
            });
        }
        if !config.tokenizer_path.exists() {
            return Err(EmbeddingError::ModelNotFound {
                path: config.tokenizer_path.display().to_string(),
            });
        }

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&config.model_path))
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;

        let mut tokenizer = tokenizers::Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_truncation(None)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        tracing::info!(
            model = %config.model_name,
            path = %config.model_path.display(),
            dimensions = config.dimensions,
            "ONNX embedding model loaded"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name: config.model_name,
            dimensions: config.dimensions,
            max_tokens: config.max_tokens,
            token_type_ids: config.token_type_ids,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        validate_input(text)?;

        // ONNX inference is CPU-bound, run on the blocking thread pool.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let params = InferenceParams {
            dimensions: self.dimensions,
            max_tokens: self.max_tokens,
            token_type_ids: self.token_type_ids,
        };
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut session_guard = session
                .lock()
                .map_err(|e| EmbeddingError::OnnxInference(format!("session lock poisoned: {e}")))?;
            embed_sync(&mut session_guard, &tokenizer, &text, params)
        })
        .await
        .map_err(|e| EmbeddingError::OnnxInference(format!("spawn_blocking join error: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

#[derive(Debug, Clone, Copy)]
struct InferenceParams {
    dimensions: usize,
    max_tokens: usize,
    token_type_ids: bool,
}

/// Run ONNX inference synchronously.
fn embed_sync(
    session: &mut Session,
    tokenizer: &tokenizers::Tokenizer,
    text: &str,
    params: InferenceParams,
) -> Result<Vec<f32>, EmbeddingError> {
    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

    let seq_len = encoding.get_ids().len();
    if seq_len > params.max_tokens {
        return Err(EmbeddingError::InputTooLong {
            tokens: seq_len,
            limit: params.max_tokens,
        });
    }

    let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let attention_mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&m| m as i64)
        .collect();
    let shape = vec![1i64, seq_len as i64];

    // batch_size=1
    let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids))
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;
    let attention_mask_tensor = Tensor::from_array((shape.clone(), attention_mask.clone()))
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    let outputs = if params.token_type_ids {
        let token_type_ids: Vec<i64> = encoding
            .get_type_ids()
            .iter()
            .map(|&t| t as i64)
            .collect();
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;
        session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
            "token_type_ids" => token_type_ids_tensor,
        })
    } else {
        session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
        })
    }
    .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    // last_hidden_state: [1, seq_len, hidden_dim]
    let (out_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| EmbeddingError::OnnxInference(e.to_string()))?;

    if out_shape.len() != 3 {
        return Err(EmbeddingError::OnnxInference(format!(
            "Expected 3D output, got {}D",
            out_shape.len()
        )));
    }
    let out_seq_len = out_shape[1] as usize;
    let hidden_dim = out_shape[2] as usize;

    let mut pooled = mean_pool(data, out_seq_len, hidden_dim, &attention_mask);
    l2_normalize(&mut pooled);

    if pooled.len() != params.dimensions {
        return Err(EmbeddingError::InvalidDimensions {
            expected: params.dimensions,
            actual: pooled.len(),
        });
    }

    Ok(pooled)
}

/// Attention-masked mean over the token axis of a flat `[seq_len, hidden_dim]` buffer.
pub fn mean_pool(hidden: &[f32], seq_len: usize, hidden_dim: usize, mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden_dim];
    let mut mask_sum = 0.0f32;

    for tok_idx in 0..seq_len {
        let mask_val = mask.get(tok_idx).copied().unwrap_or(0) as f32;
        if mask_val <= 0.0 {
            continue;
        }
        mask_sum += mask_val;
        let row = &hidden[tok_idx * hidden_dim..(tok_idx + 1) * hidden_dim];
        for (acc, &v) in pooled.iter_mut().zip(row) {
            *acc += v * mask_val;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut pooled {
            *v /= mask_sum;
        }
    }
    pooled
}

/// Scale to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Resolve the default model directory.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("bananabath/models")
}

/// Resolve paths for the ONNX model and tokenizer.
///
/// If `onnx_model_path` is empty, uses `<default dir>/<model_name>.onnx`.
/// The tokenizer always sits next to the model as `<stem>-tokenizer.json`.
pub fn resolve_onnx_paths(onnx_model_path: &str, model_name: &str) -> (PathBuf, PathBuf) {
    let model = if onnx_model_path.is_empty() {
        default_model_dir().join(format!("{model_name}.onnx"))
    } else {
        crate::config::expand_path(onnx_model_path)
    };
    let stem = model
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let tokenizer = model.with_file_name(format!("{stem}-tokenizer.json"));
    (model, tokenizer)
}

// ============================================================================
// TESTS
// ============================================================================
