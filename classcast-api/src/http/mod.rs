// Module: http
// Read surface for players plus status endpoints and the WebSocket route.

pub mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use classcast_core::room::RoomHub;
use classcast_livestream::StreamOrchestrator;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub hub: RoomHub,
    pub orchestrator: Arc<StreamOrchestrator>,
    pub streams_dir: PathBuf,
    pub send_queue_capacity: usize,
    pub idle_timeout: Duration,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Status endpoints
        .route("/api/streams", get(list_streams))
        .route("/api/rooms/:stream_key", get(room_summary))
        // Realtime event channel
        .route("/ws/room/:stream_key", get(crate::websocket::websocket_handler))
        // HLS read surface (master playlists written by the orchestrator,
        // variants and segments by the transcoder)
        .route("/streams/:file", get(serve_stream_file))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// List active streams
async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.active_streams())
}

/// Summary of one room
async fn room_summary(
    State(state): State<AppState>,
    Path(stream_key): Path<String>,
) -> AppResult<Response> {
    let summary = state.hub.room_summary(&stream_key).await?;
    Ok(Json(summary).into_response())
}

/// Serve one HLS artifact with origin-side cache hints: playlists must be
/// revalidated on every fetch, segments never change once written.
async fn serve_stream_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> AppResult<Response> {
    if !is_safe_filename(&file) {
        return Err(AppError::bad_request("Invalid file name"));
    }
    let Some((content_type, cache_control)) = headers_for(&file) else {
        return Err(AppError::not_found("Unrecognized stream artifact"));
    };

    let path = state.streams_dir.join(&file);
    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(%file, "Stream artifact not found");
            return Err(AppError::not_found("Not found"));
        }
        Err(e) => {
            return Err(AppError::internal_server_error(format!(
                "Failed to read artifact: {e}"
            )));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, cache_control)
        .body(body.into())
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}

/// A single path segment with no traversal potential.
fn is_safe_filename(file: &str) -> bool {
    !file.is_empty()
        && !file.contains(['/', '\\'])
        && !file.contains("..")
        && file.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '%'))
}

/// Content type + cache policy by artifact suffix.
fn headers_for(file: &str) -> Option<(&'static str, &'static str)> {
    const IMMUTABLE: &str = "public, max-age=31536000, immutable";
    if file.ends_with(".m3u8") {
        Some(("application/vnd.apple.mpegurl", "no-cache"))
    } else if file.ends_with(".ts") {
        Some(("video/mp2t", IMMUTABLE))
    } else if file.ends_with(".m4s") {
        Some(("video/iso.segment", IMMUTABLE))
    } else if file.ends_with(".mp4") {
        Some(("video/mp4", IMMUTABLE))
    } else {
        None
    }
}
