//! Thin HTTP transport shim (spec.md §1 Non-goals: "the HTTP transport ...
//! treated as external collaborators via their contracts only"). Parses the
//! inbound multipart/URL request into a [`diarization_domain::Request`],
//! drives the orchestrator, and either streams SSE progress or returns a
//! single JSON object — axum never sees vendor JSON, and the orchestrator
//! never calls the transport directly (§9 "SSE as a channel").

pub mod error;
pub mod handlers;
pub mod sse;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

pub use error::HttpError;
pub use state::AppState;

/// Builds the full route table. `axum::extract::Multipart` payloads carry
/// raw audio bytes, so the route gets a raised body limit (mirrors the
/// teacher's `transcribe_audio` route in `http/src/lib.rs`).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health::health_check))
        .route("/diarize-overlap", post(handlers::diarize::diarize_overlap).layer(DefaultBodyLimit::max(512 * 1024 * 1024)))
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!(host, port, "diarization server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
