//! Mock remote player API for testing
//!
//! Simulates the `/me/player` endpoints: playback state, device list,
//! transfer, play and the transport commands. Transfers activate the target
//! device; plays start the requested context on the active device.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Mock device registration
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub id: String,
    pub name: String,
    pub is_active: bool,
}

/// Mock playback state
#[derive(Debug, Clone, Default)]
pub struct MockPlayback {
    pub context_uri: Option<String>,
    pub track_uri: Option<String>,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
}

#[derive(Default)]
struct MockRemoteState {
    devices: Vec<MockDevice>,
    playback: Option<MockPlayback>,
    transfers: Vec<String>,
    plays: Vec<Value>,
    commands: Vec<String>,
    tokens: Vec<String>,
    /// Respond to every request with this status
    fail_with: Option<StatusCode>,
}

impl MockRemoteState {
    fn active_device(&self) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.is_active)
    }
}

type Shared = Arc<RwLock<MockRemoteState>>;

/// Mock remote player API server
pub struct MockRemoteServer {
    addr: SocketAddr,
    state: Shared,
    handle: JoinHandle<()>,
}

impl MockRemoteServer {
    /// Start a mock server on a random port
    pub async fn start() -> Self {
        let state: Shared = Arc::new(RwLock::new(MockRemoteState::default()));

        let app = Router::new()
            .route("/me/player", get(handle_state).put(handle_transfer))
            .route("/me/player/devices", get(handle_devices))
            .route("/me/player/play", put(handle_play))
            .route("/me/player/pause", put(handle_pause))
            .route("/me/player/next", post(handle_next))
            .route("/me/player/previous", post(handle_previous))
            .route("/me/player/seek", put(handle_seek))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base URL to hand to the client
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn add_device(&self, id: &str, name: &str, is_active: bool) {
        let mut state = self.state.write().await;
        state.devices.retain(|d| d.id != id);
        if is_active {
            for device in &mut state.devices {
                device.is_active = false;
            }
        }
        state.devices.push(MockDevice {
            id: id.to_string(),
            name: name.to_string(),
            is_active,
        });
    }

    pub async fn remove_device(&self, id: &str) {
        self.state.write().await.devices.retain(|d| d.id != id);
    }

    pub async fn set_playback(&self, playback: Option<MockPlayback>) {
        self.state.write().await.playback = playback;
    }

    pub async fn fail_with(&self, status: Option<StatusCode>) {
        self.state.write().await.fail_with = status;
    }

    pub async fn transfers(&self) -> Vec<String> {
        self.state.read().await.transfers.clone()
    }

    pub async fn plays(&self) -> Vec<Value> {
        self.state.read().await.plays.clone()
    }

    pub async fn commands(&self) -> Vec<String> {
        self.state.read().await.commands.clone()
    }

    /// Bearer tokens seen so far, in request order
    pub async fn tokens(&self) -> Vec<String> {
        self.state.read().await.tokens.clone()
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

/// Record the bearer token and short-circuit injected failures
async fn admit(state: &Shared, headers: &HeaderMap) -> Option<Response> {
    let mut state = state.write().await;
    if let Some(token) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.tokens.push(token.to_string());
    } else {
        return Some(StatusCode::UNAUTHORIZED.into_response());
    }
    state
        .fail_with
        .map(|status| (status, Json(json!({"error": {"status": status.as_u16()}}))).into_response())
}

fn device_json(device: &MockDevice) -> Value {
    json!({
        "id": device.id,
        "name": device.name,
        "is_active": device.is_active,
        "type": "Speaker",
    })
}

async fn handle_state(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(rejected) = admit(&state, &headers).await {
        return rejected;
    }
    let state = state.read().await;
    let Some(playback) = &state.playback else {
        return StatusCode::NO_CONTENT.into_response();
    };
    Json(json!({
        "device": state.active_device().map(device_json),
        "progress_ms": playback.progress_ms,
        "is_playing": playback.is_playing,
        "item": playback.track_uri.as_ref().map(|uri| json!({
            "uri": uri,
            "duration_ms": playback.duration_ms,
        })),
        "context": playback.context_uri.as_ref().map(|uri| json!({ "uri": uri })),
    }))
    .into_response()
}

async fn handle_devices(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(rejected) = admit(&state, &headers).await {
        return rejected;
    }
    let state = state.read().await;
    let devices: Vec<Value> = state.devices.iter().map(device_json).collect();
    Json(json!({ "devices": devices })).into_response()
}

#[derive(Debug, Deserialize)]
struct TransferBody {
    device_ids: Vec<String>,
    #[serde(default)]
    play: bool,
}

async fn handle_transfer(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<TransferBody>,
) -> Response {
    if let Some(rejected) = admit(&state, &headers).await {
        return rejected;
    }
    let mut state = state.write().await;
    let Some(target) = body.device_ids.first().cloned() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !state.devices.iter().any(|d| d.id == target) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "Device not found"}})),
        )
            .into_response();
    }
    for device in &mut state.devices {
        device.is_active = device.id == target;
    }
    if body.play {
        if let Some(playback) = state.playback.as_mut() {
            playback.is_playing = true;
        }
    }
    state.transfers.push(target);
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct DeviceQuery {
    device_id: Option<String>,
    position_ms: Option<u64>,
}

async fn handle_play(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejected) = admit(&state, &headers).await {
        return rejected;
    }
    let mut state = state.write().await;
    if let Some(id) = &query.device_id {
        if !state.devices.iter().any(|d| &d.id == id) {
            return StatusCode::NOT_FOUND.into_response();
        }
        for device in &mut state.devices {
            device.is_active = &device.id == id;
        }
    }

    let context_uri = body["context_uri"].as_str().map(str::to_string);
    let track_uri = body["offset"]["uri"]
        .as_str()
        .map(str::to_string)
        .or_else(|| context_uri.as_ref().map(|c| format!("{}:track:0", c)));
    state.playback = Some(MockPlayback {
        context_uri,
        track_uri,
        progress_ms: body["position_ms"].as_u64().unwrap_or(0),
        duration_ms: 180_000,
        is_playing: true,
    });
    state.plays.push(body);
    StatusCode::NO_CONTENT.into_response()
}

async fn command(state: &Shared, headers: &HeaderMap, name: String) -> Response {
    if let Some(rejected) = admit(state, headers).await {
        return rejected;
    }
    let mut state = state.write().await;
    if state.active_device().is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"reason": "NO_ACTIVE_DEVICE"}})),
        )
            .into_response();
    }
    state.commands.push(name);
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_pause(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let response = command(&state, &headers, "pause".into()).await;
    if response.status().is_success() {
        if let Some(playback) = state.write().await.playback.as_mut() {
            playback.is_playing = false;
        }
    }
    response
}

async fn handle_next(State(state): State<Shared>, headers: HeaderMap) -> Response {
    command(&state, &headers, "next".into()).await
}

async fn handle_previous(State(state): State<Shared>, headers: HeaderMap) -> Response {
    command(&state, &headers, "previous".into()).await
}

async fn handle_seek(
    State(state): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let Some(position) = query.position_ms else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    command(&state, &headers, format!("seek:{}", position)).await
}
