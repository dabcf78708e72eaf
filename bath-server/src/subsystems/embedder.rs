//! Embedder subsystem: owns the process-wide embedding backend
//!
//! The backend is created lazily by the first request that needs it. Requests
//! arriving while the model is loading wait on the same initialisation and then
//! share one `Arc` instance read-only. The load runs in its own task, so a
//! caller that stops waiting (request timeout) does not cancel it. A failed
//! load is not cached, so the next request retries it.

use std::sync::Arc;

use std::time::Instant;

use bath_core::{
    embeddings::{create_backend, BackendConfig, EmbeddingBackend, EmbeddingError},
    BathConfig,
};
use tokio::sync::OnceCell;

/// Builds a backend. Runs on the blocking pool, since ONNX model loading does file IO.
pub type BackendLoader =
    Arc<dyn Fn() -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> + Send + Sync>;

pub struct LazyEmbedder {
    model: String,
    dimensions: usize,
    loader: BackendLoader,
    cell: Arc<OnceCell<Arc<dyn EmbeddingBackend>>>,
}

impl std::fmt::Debug for LazyEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEmbedder")
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl LazyEmbedder {
    pub fn from_config(config: &BathConfig) -> Self {
        let backend_config = BackendConfig::from_settings(&config.embedding);
        let model = backend_config.model().to_string();
        let dimensions = backend_config.dimensions();
        let loader: BackendLoader = Arc::new(move || create_backend(backend_config.clone()));
        Self::with_loader(model, dimensions, loader)
    }

    pub fn with_loader(model: impl Into<String>, dimensions: usize, loader: BackendLoader) -> Self {
        Self {
            model: model.into(),
            dimensions,
            loader,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Wrap an already-built backend.
    pub fn preloaded(backend: Arc<dyn EmbeddingBackend>) -> Self {
        let model = backend.model().to_string();
        let dimensions = backend.dimensions();
        let loader: BackendLoader = Arc::new(|| -> Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
            Err(EmbeddingError::ModelLoad(
                "preloaded embedder has no loader".to_string(),
            ))
        });
        Self {
            model,
            dimensions,
            loader,
            cell: Arc::new(OnceCell::new_with(Some(backend))),
        }
    }

    /// Model the backend will report once loaded.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Get the shared backend, loading it on first use.
    pub async fn get(&self) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
        if let Some(backend) = self.cell.get() {
            return Ok(Arc::clone(backend));
        }

        let cell = Arc::clone(&self.cell);
        let loader = Arc::clone(&self.loader);
        let model = self.model.clone();
        tokio::spawn(async move {
            let backend = cell.get_or_try_init(|| load_backend(loader, model)).await?;
            Ok::<_, EmbeddingError>(Arc::clone(backend))
        })
        .await
        .map_err(|e| EmbeddingError::ModelLoad(format!("loader task failed: {e}")))?
    }
}

async fn load_backend(
    loader: BackendLoader,
    model: String,
) -> Result<Arc<dyn EmbeddingBackend>, EmbeddingError> {
    let started = Instant::now();
    let backend = tokio::task::spawn_blocking(move || loader())
        .await
        .map_err(|e| EmbeddingError::ModelLoad(format!("loader task failed: {e}")))?
        .map_err(|e| {
            tracing::error!(model = %model, error = %e, "Embedding backend load failed");
            e
        })?;
    tracing::info!(
        backend = backend.name(),
        model = backend.model(),
        took_ms = started.elapsed().as_millis() as u64,
        "Embedding backend ready"
    );
    Ok(Arc::from(backend))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedBackend;

    #[async_trait]
    impl EmbeddingBackend for FixedBackend {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model(&self) -> &str {
            "fixed"
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn counting_loader(loads: Arc<AtomicUsize>, fail_first: bool) -> BackendLoader {
        Arc::new(move || {
            let n = loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            if fail_first && n == 0 {
                return Err(EmbeddingError::ModelLoad("disk on fire".to_string()));
            }
            Ok(Box::new(FixedBackend) as Box<dyn EmbeddingBackend>)
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = Arc::new(LazyEmbedder::with_loader(
            "fixed",
            2,
            counting_loader(Arc::clone(&loads), false),
        ));
        assert!(!embedder.is_loaded());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let embedder = Arc::clone(&embedder);
                tokio::spawn(async move { embedder.get().await })
            })
            .collect();

        let mut backends = Vec::new();
        for h in handles {
            backends.push(h.await.unwrap().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1, "model must load exactly once");
        for b in &backends[1..] {
            assert!(Arc::ptr_eq(&backends[0], b), "all callers share one instance");
        }
        assert!(embedder.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried_by_next_caller() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = LazyEmbedder::with_loader("fixed", 2, counting_loader(Arc::clone(&loads), true));

        let first = embedder.get().await;
        assert!(matches!(first, Err(EmbeddingError::ModelLoad(_))));
        assert!(!embedder.is_loaded());

        let second = embedder.get().await.unwrap();
        assert_eq!(second.embed("x").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = LazyEmbedder::with_loader("fixed", 2, counting_loader(Arc::clone(&loads), false));

        let gave_up = tokio::time::timeout(Duration::from_millis(5), embedder.get()).await;
        assert!(gave_up.is_err(), "caller should stop waiting before the load ends");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(embedder.is_loaded(), "load finishes without a waiting caller");

        embedder.get().await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preload_and_first_query_share_one_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let embedder = Arc::new(LazyEmbedder::with_loader(
            "fixed",
            2,
            counting_loader(Arc::clone(&loads), false),
        ));

        let preload = {
            let embedder = Arc::clone(&embedder);
            tokio::spawn(async move { embedder.get().await })
        };
        let query_backend = embedder.get().await.unwrap();
        let preload_backend = preload.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&query_backend, &preload_backend));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_preloaded_reports_backend_metadata() {
        let embedder = LazyEmbedder::preloaded(Arc::new(FixedBackend));
        assert!(embedder.is_loaded());
        assert_eq!(embedder.model(), "fixed");
        assert_eq!(embedder.dimensions(), 2);
        assert_eq!(embedder.get().await.unwrap().name(), "fixed");
    }

    #[test]
    fn test_from_config_reads_model_without_loading() {
        let config = BathConfig::from_toml_str(
            r#"
            [embedding]
            backend = "onnx"
            model = "all-MiniLM-L6-v2"
            dimensions = 384
            onnx_model_path = "/nonexistent/all-MiniLM-L6-v2.onnx"

            [dataset]
            path = "unused.msgpack"
            "#,
        )
        .unwrap();
        let embedder = LazyEmbedder::from_config(&config);
        assert_eq!(embedder.model(), "all-MiniLM-L6-v2");
        assert_eq!(embedder.dimensions(), 384);
        assert!(!embedder.is_loaded());
    }
}
