//! API Routes

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};

use super::video::{content_type, frame_stream};
use crate::error::Result;
use crate::models::{
    ApiResponse, Arm, ArmReport, HomeResponse, RobotDataResponse, TorqueRequest, TorqueResponse,
};
use crate::motor_bus::ARM_MOTORS;
use crate::state::AppState;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Dashboard
        .route("/", get(dashboard))
        // Telemetry & video
        .route("/robot_data", get(robot_data))
        .route("/video_feed", get(video_feed))
        // Commands
        .route("/reconnect", post(reconnect))
        .route("/api/arms/:arm/torque", post(set_torque))
        .route("/api/arms/:arm/home", post(move_home))
        // Health
        .route("/healthz", get(super::health_check))
        .with_state(state)
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// Latest snapshot of both arms
async fn robot_data(State(state): State<AppState>) -> Json<RobotDataResponse> {
    let leader = state.store.snapshot(Arm::Leader).await;
    let follower = state.store.snapshot(Arm::Follower).await;

    Json(RobotDataResponse {
        leader: ArmReport::from_snapshot(&leader),
        follower: ArmReport::from_snapshot(&follower),
    })
}

/// MJPEG stream until the client goes away
async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let lease = state.viewers.register();
    let stream = frame_stream(
        state.store.clone(),
        lease,
        state.viewers.shutdown_signal(),
        state.config.video_poll_interval,
    );

    (
        [
            (header::CONTENT_TYPE, content_type()),
            (header::CACHE_CONTROL, "no-cache, private".to_string()),
        ],
        Body::from_stream(stream),
    )
}

async fn reconnect(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.reconnect().await)
}

/// Relax (`enabled: false`) or hold (`enabled: true`) an arm
async fn set_torque(
    State(state): State<AppState>,
    Path(arm): Path<String>,
    Json(req): Json<TorqueRequest>,
) -> Result<Json<ApiResponse<TorqueResponse>>> {
    let arm: Arm = arm.parse()?;
    state.orchestrator.set_torque(arm, req.enabled).await?;

    Ok(Json(ApiResponse::success(TorqueResponse {
        arm,
        enabled: req.enabled,
    })))
}

/// Drive an arm to its folded rest pose
async fn move_home(
    State(state): State<AppState>,
    Path(arm): Path<String>,
) -> Result<Json<ApiResponse<HomeResponse>>> {
    let arm: Arm = arm.parse()?;
    state.orchestrator.move_home(arm).await?;

    Ok(Json(ApiResponse::success(HomeResponse {
        arm,
        goal_positions: ARM_MOTORS
            .iter()
            .map(|m| (m.name.to_string(), m.home_position))
            .collect(),
    })))
}
