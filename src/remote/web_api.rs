//! reqwest-backed client for the `/me/player` family of endpoints

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{DeviceInfo, PlayRequest, PlaybackSnapshot, PlayerApi};
use crate::credentials::CredentialProvider;
use crate::error::{RecoveryError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RawDevice {
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_active: bool,
    #[serde(rename = "type")]
    device_type: Option<String>,
}

impl From<RawDevice> for DeviceInfo {
    fn from(raw: RawDevice) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            is_active: raw.is_active,
            device_type: raw.device_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawItem {
    uri: Option<String>,
    duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPlayback {
    device: Option<RawDevice>,
    progress_ms: Option<u64>,
    #[serde(default)]
    is_playing: bool,
    item: Option<RawItem>,
    context: Option<RawContext>,
}

impl From<RawPlayback> for PlaybackSnapshot {
    fn from(raw: RawPlayback) -> Self {
        let (track_uri, duration_ms) = raw
            .item
            .map(|item| (item.uri, item.duration_ms))
            .unwrap_or((None, None));
        Self {
            device: raw.device.map(DeviceInfo::from),
            track_uri,
            duration_ms,
            progress_ms: raw.progress_ms,
            is_playing: raw.is_playing,
            context_uri: raw.context.and_then(|c| c.uri),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDevices {
    #[serde(default)]
    devices: Vec<RawDevice>,
}

pub struct WebApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl WebApiClient {
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        #[allow(clippy::expect_used)] // HTTP client creation only fails if TLS setup fails
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, path: &str, device_id: Option<&str>, extra: Option<(&str, String)>) -> String {
        let mut query = Vec::new();
        if let Some(id) = device_id {
            query.push(format!("device_id={}", urlencoding::encode(id)));
        }
        if let Some((key, value)) = extra {
            query.push(format!("{}={}", key, urlencoding::encode(&value)));
        }
        if query.is_empty() {
            format!("{}/me/player{}", self.base_url, path)
        } else {
            format!("{}/me/player{}?{}", self.base_url, path, query.join("&"))
        }
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.credentials.access_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    /// Send and map non-2xx responses to transport errors
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(status = %status, "{} response", what);
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RecoveryError::Transport(format!(
            "{} failed: {} {}",
            what,
            status,
            body.trim()
        )))
    }

    /// Bodyless command (pause/next/previous/seek)
    async fn command(&self, method: Method, url: String, what: &str) -> Result<()> {
        let builder = self.request(method, &url).await?.body(Vec::new());
        self.send(builder, what).await?;
        Ok(())
    }
}

#[async_trait]
impl PlayerApi for WebApiClient {
    async fn playback_state(&self) -> Result<Option<PlaybackSnapshot>> {
        let url = self.url("", None, None);
        let response = self
            .send(self.request(Method::GET, &url).await?, "playback state")
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let raw: RawPlayback = serde_json::from_slice(&bytes)
            .map_err(|e| RecoveryError::Transport(format!("invalid playback state: {}", e)))?;
        Ok(Some(raw.into()))
    }

    async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let url = self.url("/devices", None, None);
        let response = self
            .send(self.request(Method::GET, &url).await?, "device list")
            .await?;
        let raw: RawDevices = response.json().await?;
        Ok(raw.devices.into_iter().map(DeviceInfo::from).collect())
    }

    async fn transfer_playback(&self, device_id: &str) -> Result<()> {
        let url = self.url("", None, None);
        let builder = self
            .request(Method::PUT, &url)
            .await?
            .json(&json!({ "device_ids": [device_id], "play": false }));
        self.send(builder, "transfer").await?;
        Ok(())
    }

    async fn play(&self, device_id: Option<&str>, request: &PlayRequest) -> Result<()> {
        let url = self.url("/play", device_id, None);
        let builder = self.request(Method::PUT, &url).await?.json(request);
        self.send(builder, "play").await?;
        Ok(())
    }

    async fn pause(&self, device_id: Option<&str>) -> Result<()> {
        self.command(Method::PUT, self.url("/pause", device_id, None), "pause")
            .await
    }

    async fn next(&self, device_id: Option<&str>) -> Result<()> {
        self.command(Method::POST, self.url("/next", device_id, None), "next")
            .await
    }

    async fn previous(&self, device_id: Option<&str>) -> Result<()> {
        self.command(
            Method::POST,
            self.url("/previous", device_id, None),
            "previous",
        )
        .await
    }

    async fn seek(&self, device_id: Option<&str>, position_ms: u64) -> Result<()> {
        let url = self.url(
            "/seek",
            device_id,
            Some(("position_ms", position_ms.to_string())),
        );
        self.command(Method::PUT, url, "seek").await
    }
}
