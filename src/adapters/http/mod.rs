//! Inbound HTTP adapter.
//!
//! Routes:
//! - `POST /stream_file`, `POST /convert`: convert a remote (or local) source
//! - `POST /upload`: convert an uploaded file
//! - `GET /static|/stream|/hls_streams/{session}/{filename}`: serve output
//! - `GET /sessions/{session}`: conversion status
//! - `GET /health`

mod artifacts;
mod convert;
mod cors;
pub mod error;
mod status;
mod upload;

use crate::application::pipeline::ConversionPipeline;
use crate::config::AllowedOrigins;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ConversionPipeline>,
}

#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub allowed_origins: AllowedOrigins,
    pub max_upload_bytes: usize,
}

pub fn router(state: AppState, options: &HttpOptions) -> Router {
    let artifact = get(artifacts::serve_artifact);

    Router::new()
        .route("/stream_file", post(convert::stream_file))
        .route("/convert", post(convert::stream_file))
        .route("/upload", post(upload::upload_media))
        .route("/static/:session/:filename", artifact.clone())
        .route("/stream/:session/:filename", artifact.clone())
        .route("/hls_streams/:session/:filename", artifact)
        .route("/sessions/:session", get(status::session_status))
        .route("/health", get(status::health))
        .layer(DefaultBodyLimit::max(options.max_upload_bytes))
        .layer(cors::cors_layer(&options.allowed_origins))
        .layer(middleware::from_fn(cors::preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
