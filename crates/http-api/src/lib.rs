//! HTTP surface of the receiver.
//!
//! Thin axum adapter over [`chunkferry_receiver::UploadCoordinator`]:
//! routing, multipart/binary normalization, CORS, backpressure, and
//! the uniform error envelope. No upload semantics live here.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use chunkferry_receiver::config::CorsConfig;
use chunkferry_receiver::{ReceiverConfig, UploadCoordinator};

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UploadCoordinator>,
    /// Concurrent chunk-upload ceiling; exhaustion sheds with 429.
    pub upload_slots: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(coordinator: Arc<UploadCoordinator>, max_concurrent_uploads: usize) -> Self {
        Self {
            coordinator,
            upload_slots: Arc::new(tokio::sync::Semaphore::new(max_concurrent_uploads)),
        }
    }
}

/// Builds the upload router with CORS, tracing and body-limit layers.
pub fn router(state: AppState, config: &ReceiverConfig) -> Router {
    // Chunk payload plus multipart framing slack.
    let body_limit = usize::try_from(config.chunk.max_size)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route(
            "/upload",
            post(handlers::upload_chunk_multipart).get(handlers::list_uploads),
        )
        .route("/upload/binary", post(handlers::upload_chunk_binary))
        .route("/upload/resumable", get(handlers::list_resumable))
        .route(
            "/upload/{id}",
            get(handlers::get_status).delete(handlers::cancel_upload),
        )
        .route("/upload/{id}/complete", post(handlers::complete_upload))
        .route("/upload/{id}/resume", post(handlers::resume_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router(state, config)` until the token is cancelled.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    config: &ReceiverConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = router(state, config);
    tracing::info!(addr = %listener.local_addr()?, "upload server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    // A wildcard header list cannot be combined with credentials, so
    // mirror whatever the preflight asks for instead.
    let headers = if config.allowed_headers.iter().any(|h| h == "*") {
        AllowHeaders::mirror_request()
    } else {
        AllowHeaders::list(
            config
                .allowed_headers
                .iter()
                .filter_map(|h| h.parse::<HeaderName>().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(headers)
        .allow_credentials(config.allow_credentials)
        .max_age(config.max_age)
}
