use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stream::{capture_jpeg, ClientStats};
use crate::video::CaptureInfo;

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub device: CaptureInfo,
    pub released: bool,
    pub shutting_down: bool,
    pub stream: StreamConfig,
    pub clients: Vec<ClientStats>,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let released = state.session.is_released();
    let shutting_down = state.shutdown.is_requested();

    Json(HealthResponse {
        status: if released || shutting_down {
            "stopping"
        } else {
            "ok"
        },
        version: env!("CARGO_PKG_VERSION"),
        device: state.session.info().clone(),
        released,
        shutting_down,
        stream: state.config.stream.clone(),
        clients: state.clients.stats(),
    })
}

// ============================================================================
// MJPEG
// ============================================================================

/// Query parameters for MJPEG stream
#[derive(Deserialize, Default)]
pub struct MjpegStreamQuery {
    /// Optional client ID (if not provided, a random UUID will be generated)
    pub client_id: Option<String>,
}

/// MJPEG stream endpoint
pub async fn mjpeg_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MjpegStreamQuery>,
) -> Result<Response> {
    let client_id = query
        .client_id
        .filter(|id| !id.is_empty() && id.len() <= 64)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state.publisher.open(client_id)
}

/// Single JPEG snapshot, read and encoded on demand
pub async fn snapshot(State(state): State<Arc<AppState>>) -> Result<Response> {
    if state.shutdown.is_requested() {
        return Err(AppError::ServiceUnavailable(
            "Server is shutting down".to_string(),
        ));
    }

    let frame = capture_jpeg(
        state.session.clone(),
        state.encoder.clone(),
        state.config.stream.quality,
    )
    .await
    .map_err(|e| AppError::ServiceUnavailable(format!("No frame available: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, frame.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        frame.data,
    )
        .into_response())
}
