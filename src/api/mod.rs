//! HTTP API handlers

use crate::bus::SharedBus;
use crate::device::{DeviceCheckState, DeviceManager};
use crate::health::{ConnectionQuality, DeviceHealthStatus, HealthMonitor};
use crate::playback::{PlaybackCommand, PlaybackService};
use crate::player::{PlayerLifecycle, PlayerStatus};
use crate::recovery::{
    CircuitBreakerState, RecoveryOrchestrator, RecoveryOutcome, RecoveryState, RecoveryTrigger,
};
use crate::remote::PlayRequest;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RecoveryOrchestrator>,
    pub devices: Arc<DeviceManager>,
    pub lifecycle: Arc<dyn PlayerLifecycle>,
    pub health: Arc<HealthMonitor>,
    pub queue: PlaybackService,
    pub bus: SharedBus,
    pub started_at: Instant,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Build the HTTP router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/recovery", post(recover_handler))
        .route("/recovery/reset", post(reset_handler))
        .route("/device/check", post(device_check_handler))
        .route("/control", post(control_handler))
        .route("/events", get(events_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub uptime_secs: u64,
    pub recovery: RecoveryState,
    pub recovering: bool,
    pub breaker: CircuitBreakerState,
    pub health: DeviceHealthStatus,
    pub connection: ConnectionQuality,
    pub player_status: PlayerStatus,
    pub device_id: Option<String>,
    pub device: DeviceCheckState,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "jukebox-recovery",
        version: env!("JUKEBOX_VERSION"),
        git_sha: env!("JUKEBOX_GIT_SHA"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        recovery: state.orchestrator.state(),
        recovering: state.orchestrator.is_recovering(),
        breaker: state.orchestrator.breaker().snapshot(),
        health: state.health.status(),
        connection: state.health.quality(),
        player_status: state.lifecycle.status(),
        device_id: state.lifecycle.device_id(),
        device: state.devices.state(),
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Recovery handlers
// =============================================================================

/// POST /recovery - Run a recovery cycle now
pub async fn recover_handler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.orchestrator.recover().await;
    let status = match outcome {
        RecoveryOutcome::Skipped(_) => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    (status, Json(outcome))
}

/// POST /recovery/reset - Forget attempts and breaker history
pub async fn reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.reset() {
        (StatusCode::OK, Json(state.orchestrator.state())).into_response()
    } else {
        error_response(StatusCode::CONFLICT, "recovery in progress")
    }
}

#[derive(Serialize)]
pub struct DeviceCheckResponse {
    pub ok: bool,
    pub state: DeviceCheckState,
}

/// POST /device/check - Verify the managed device end to end
pub async fn device_check_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.is_recovering() {
        return error_response(StatusCode::CONFLICT, "recovery in progress");
    }
    let ok = state.devices.check_device().await;
    Json(DeviceCheckResponse {
        ok,
        state: state.devices.state(),
    })
    .into_response()
}

// =============================================================================
// Playback control
// =============================================================================

/// Control request body
#[derive(Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub position_ms: Option<u64>,
}

/// POST /control - Queue a playback command on the managed device
pub async fn control_handler(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> impl IntoResponse {
    let command = match req.action.as_str() {
        "play" => PlaybackCommand::Play(PlayRequest::default()),
        "pause" => PlaybackCommand::Pause,
        "next" => PlaybackCommand::Next,
        "previous" => PlaybackCommand::Previous,
        "seek" => match req.position_ms {
            Some(position_ms) => PlaybackCommand::Seek(position_ms),
            None => return error_response(StatusCode::BAD_REQUEST, "seek requires position_ms"),
        },
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown action: {}", other),
            )
        }
    };

    let device_id = state.lifecycle.device_id();
    match state.queue.submit(device_id.as_deref(), command).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

// =============================================================================
// Server-Sent Events
// =============================================================================

/// GET /events - Server-Sent Events stream
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => serde_json::to_string(&event)
            .ok()
            .map(|json| Ok(Event::default().data(json))),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
