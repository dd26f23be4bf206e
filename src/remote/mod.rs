//! Remote streaming-service player API
//!
//! Only the handful of calls the recovery flow and the playback queue need.

pub mod web_api;

pub use web_api::WebApiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A playback endpoint registered with the remote service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub id: Option<String>,
    pub name: String,
    pub is_active: bool,
    #[serde(default)]
    pub device_type: Option<String>,
}

/// Read-only snapshot of the remote playback state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSnapshot {
    pub device: Option<DeviceInfo>,
    pub track_uri: Option<String>,
    pub duration_ms: Option<u64>,
    pub progress_ms: Option<u64>,
    pub is_playing: bool,
    pub context_uri: Option<String>,
}

impl PlaybackSnapshot {
    /// Id of the device the remote service reports as playing
    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.id.as_deref())
    }
}

/// Where to start within a context
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum PlayOffset {
    Uri { uri: String },
    Position { position: u32 },
}

/// Body of a resume request
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PlayRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<PlayOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_ms: Option<u64>,
}

#[async_trait]
pub trait PlayerApi: Send + Sync {
    /// Current playback snapshot; `None` when nothing is playing anywhere
    async fn playback_state(&self) -> Result<Option<PlaybackSnapshot>>;

    async fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Move control to `device_id` without forcing playback
    async fn transfer_playback(&self, device_id: &str) -> Result<()>;

    async fn play(&self, device_id: Option<&str>, request: &PlayRequest) -> Result<()>;

    async fn pause(&self, device_id: Option<&str>) -> Result<()>;

    async fn next(&self, device_id: Option<&str>) -> Result<()>;

    async fn previous(&self, device_id: Option<&str>) -> Result<()>;

    async fn seek(&self, device_id: Option<&str>, position_ms: u64) -> Result<()>;
}
