//! BananaBath HTTP REST API
//!
//! Axum-based HTTP server that exposes design-image retrieval to the chat
//! frontend.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`. The inner functions are
//! directly testable without axum dispatch.
//!
//! Endpoints:
//! - GET  /health     : dataset and embedder status
//! - GET  /version    : server version info
//! - POST /api/search : top-K design images for a query

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bath_core::embeddings::EmbeddingError;
use bath_core::{BathConfig, Dataset, SearchError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::subsystems::embedder::LazyEmbedder;
use crate::subsystems::retrieve::{search_images, SearchResponse};

/// Shown to end users whenever a search fails. Details go to the log only.
pub const SEARCH_FAILED_MESSAGE: &str =
    "Sorry, I couldn't search the design catalogue right now. Please try again.";

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub dataset: Arc<Dataset>,
    pub embedder: Arc<LazyEmbedder>,
    pub config: BathConfig,
}

/// Build the Axum router with all endpoints.
/// With `[http] cors` on, any origin may call the API (the chat frontend is
/// served from a different origin).
pub fn build_router(state: Arc<HttpState>) -> Router {
    let cors = if state.config.http.cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/search", post(search_handler))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("BananaBath HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    /// Number of images wanted; defaults to `[retrieval] default_k`.
    pub k: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponseBody {
    #[serde(flatten)]
    pub response: SearchResponse,
    pub took_ms: u64,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({"status": "error"}))
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check, reports dataset and embedder state (no IO).
pub fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "images": state.dataset.len(),
            "dimensions": state.dataset.dimensions,
            "model": state.dataset.model,
            "embedder_loaded": state.embedder.is_loaded(),
        }),
    )
}

/// Inner version, returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "bananabath/1",
    })
}

/// Inner search, validates the request, then embeds and ranks under the
/// configured request timeout.
pub async fn search_inner(state: &HttpState, req: SearchRequest) -> (StatusCode, serde_json::Value) {
    let query = match req.query {
        Some(q) if !q.trim().is_empty() => q,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("query field is required").into_value(),
            );
        }
    };

    let start = Instant::now();
    let timeout_seconds = state.config.http.request_timeout_seconds;

    let search = run_search(state, &query, req.k);
    let outcome = match tokio::time::timeout(Duration::from_secs(timeout_seconds), search).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SearchError::Embedding(EmbeddingError::Timeout {
            seconds: timeout_seconds,
        })),
    };

    let took_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            let body = SearchResponseBody { response, took_ms };
            match serde_json::to_value(&body) {
                Ok(value) => (StatusCode::OK, value),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialise search response");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::new(SEARCH_FAILED_MESSAGE).into_value(),
                    )
                }
            }
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, took_ms, "Search failed");
            (
                search_error_status(&e),
                ErrorResponse::new(SEARCH_FAILED_MESSAGE)
                    .with_kind(e.kind())
                    .into_value(),
            )
        }
    }
}

async fn run_search(
    state: &HttpState,
    query: &str,
    k: Option<u32>,
) -> std::result::Result<SearchResponse, SearchError> {
    let backend = state.embedder.get().await?;
    search_images(
        query,
        k,
        &state.dataset,
        backend.as_ref(),
        &state.config.retrieval,
    )
    .await
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state);
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn search_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    let (status, body) = search_inner(&state, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Embedding failures are transient from the caller's view, so 503; a
/// retrieval failure means the served dataset is broken, so 500.
pub fn search_error_status(error: &SearchError) -> StatusCode {
    match error {
        SearchError::Embedding(EmbeddingError::EmptyInput) => StatusCode::BAD_REQUEST,
        SearchError::Embedding(_) => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::Retrieval(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Unit Tests, call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bath_core::embeddings::EmbeddingBackend;
    use bath_core::{DesignImage, RetrievalError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AxisBackend {
        vector: Vec<f32>,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingBackend for AxisBackend {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.vector.clone())
        }

        fn dimensions(&self) -> usize {
            self.vector.len()
        }

        fn model(&self) -> &str {
            "axis"
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    fn image(id: &str, embedding: Vec<f32>) -> DesignImage {
        DesignImage {
            id: id.to_string(),
            path: format!("static/modern/images/{id}.jpg"),
            url: Some(format!("/static/modern/images/{id}.jpg")),
            title: Some(format!("Modern {id}")),
            style: Some("Modern".to_string()),
            caption: None,
            embedding,
        }
    }

    fn make_state(vector: Vec<f32>, delay: Duration, timeout_seconds: u64) -> HttpState {
        let mut config = BathConfig::from_toml_str(
            r#"
            [embedding]
            backend = "onnx"
            model = "axis"
            dimensions = 2

            [dataset]
            path = "unused.msgpack"
            "#,
        )
        .unwrap();
        config.http.request_timeout_seconds = timeout_seconds;

        HttpState {
            dataset: Arc::new(Dataset::new(
                "axis",
                2,
                vec![image("a", vec![1.0, 0.0]), image("b", vec![0.0, 1.0])],
            )),
            embedder: Arc::new(LazyEmbedder::preloaded(Arc::new(AxisBackend {
                vector,
                delay,
            }))),
            config,
        }
    }

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "bananabath/1");
    }

    // ========================================================================
    // TEST 2: health_inner reports dataset header and embedder state
    // ========================================================================
    #[test]
    fn test_health_inner_reports_dataset() {
        let state = make_state(vec![1.0, 0.0], Duration::ZERO, 5);
        let (status, body) = health_inner(&state);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["images"], 2);
        assert_eq!(body["dimensions"], 2);
        assert_eq!(body["model"], "axis");
        assert_eq!(body["embedder_loaded"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    // ========================================================================
    // TEST 3: search_inner, missing or blank query returns 400
    // ========================================================================
    #[tokio::test]
    async fn test_search_inner_blank_query() {
        let state = make_state(vec![1.0, 0.0], Duration::ZERO, 5);
        for query in [None, Some(String::new()), Some("   ".to_string())] {
            let (status, body) = search_inner(&state, SearchRequest { query, k: None }).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["status"], "error");
            assert!(body["error"].is_string());
        }
    }

    // ========================================================================
    // TEST 4: search_inner, valid query returns ranked results
    // ========================================================================
    #[tokio::test]
    async fn test_search_inner_valid_query() {
        let state = make_state(vec![0.0, 1.0], Duration::ZERO, 5);
        let req = SearchRequest {
            query: Some("boho bathroom".to_string()),
            k: Some(2),
        };
        let (status, body) = search_inner(&state, req).await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["count"], 2);
        assert_eq!(body["query"], "boho bathroom");
        assert_eq!(body["results"][0]["id"], "b");
        assert_eq!(body["results"][0]["rank"], 1);
        assert_eq!(body["results"][0]["path"], "static/modern/images/b.jpg");
        assert_eq!(body["results"][1]["id"], "a");
        assert!(body["took_ms"].is_number());
    }

    // ========================================================================
    // TEST 5: search_inner, default k comes from config
    // ========================================================================
    #[tokio::test]
    async fn test_search_inner_default_k() {
        let state = make_state(vec![1.0, 0.0], Duration::ZERO, 5);
        let req = SearchRequest {
            query: Some("marble".to_string()),
            k: None,
        };
        let (status, body) = search_inner(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["results"][0]["id"], "a");
    }

    // ========================================================================
    // TEST 6: search_inner, wrong query dimensions is a 500 with generic text
    // ========================================================================
    #[tokio::test]
    async fn test_search_inner_retrieval_failure() {
        let state = make_state(vec![1.0, 0.0, 0.0], Duration::ZERO, 5);
        let req = SearchRequest {
            query: Some("marble".to_string()),
            k: Some(1),
        };
        let (status, body) = search_inner(&state, req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], SEARCH_FAILED_MESSAGE);
        assert_eq!(body["kind"], "retrieval");
        assert!(body.get("results").is_none());
    }

    // ========================================================================
    // TEST 7: search_inner, slow embedder hits the request timeout
    // ========================================================================
    #[tokio::test]
    async fn test_search_inner_timeout() {
        let state = make_state(vec![1.0, 0.0], Duration::from_secs(3), 1);
        let req = SearchRequest {
            query: Some("marble".to_string()),
            k: Some(1),
        };
        let (status, body) = search_inner(&state, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "embedding");
    }

    // ========================================================================
    // TEST 8: search_inner, embedder that fails to load is a 503
    // ========================================================================
    #[tokio::test]
    async fn test_search_inner_embedder_load_failure() {
        let mut state = make_state(vec![1.0, 0.0], Duration::ZERO, 5);
        state.embedder = Arc::new(LazyEmbedder::with_loader(
            "axis",
            2,
            Arc::new(|| -> std::result::Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
                Err(EmbeddingError::ModelNotFound {
                    path: "/missing/model.onnx".into(),
                })
            }),
        ));
        let req = SearchRequest {
            query: Some("marble".to_string()),
            k: Some(1),
        };
        let (status, body) = search_inner(&state, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], SEARCH_FAILED_MESSAGE);
        assert!(!body["error"].as_str().unwrap().contains("/missing"));
    }

    // ========================================================================
    // TEST 9: search_error_status mapping
    // ========================================================================
    #[test]
    fn test_search_error_status() {
        assert_eq!(
            search_error_status(&SearchError::Embedding(EmbeddingError::EmptyInput)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            search_error_status(&SearchError::Embedding(EmbeddingError::MissingApiKey)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            search_error_status(&SearchError::Retrieval(RetrievalError::EmptyDataset)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    // ========================================================================
    // TEST 10: cold model load outlasting the request timeout still lands
    // ========================================================================
    #[tokio::test]
    async fn test_cold_load_survives_request_timeout() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let mut state = make_state(vec![1.0, 0.0], Duration::ZERO, 1);
        state.embedder = Arc::new(LazyEmbedder::with_loader(
            "axis",
            2,
            Arc::new(move || -> std::result::Result<Box<dyn EmbeddingBackend>, EmbeddingError> {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1500));
                Ok(Box::new(AxisBackend {
                    vector: vec![1.0, 0.0],
                    delay: Duration::ZERO,
                }))
            }),
        ));
        let req = || SearchRequest {
            query: Some("marble".to_string()),
            k: Some(1),
        };

        let (status, body) = search_inner(&state, req()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "embedding");
        assert!(!state.embedder.is_loaded());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(state.embedder.is_loaded(), "load should finish after the caller timed out");

        let (status, body) = search_inner(&state, req()).await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["results"][0]["id"], "a");
        assert_eq!(loads.load(Ordering::SeqCst), 1, "model must load exactly once");
    }
}
