//! WebAPI - HTTP Endpoints
//!
//! ## Responsibilities
//!
//! - Dashboard page
//! - Telemetry snapshot and MJPEG stream
//! - Reconnect, torque and home commands
//!
//! Handlers only read the state store or go through the bus orchestrator;
//! none of them touches a hardware handle directly.

mod routes;
pub mod video;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::{Arm, HealthResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.store.uptime_secs(),
        leader_connected: state.store.is_connected(Arm::Leader).await,
        follower_connected: state.store.is_connected(Arm::Follower).await,
        camera_connected: state.store.camera_connected(),
        video_viewers: state.viewers.viewer_count(),
        video_connections_total: state.viewers.total_connections(),
        video_frames_sent: state.viewers.frames_sent(),
        frames_published: state.store.frames_published(),
    };

    Json(response)
}
