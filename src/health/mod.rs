//! HealthMonitor - periodic sampling of device, connection and playback health
//!
//! Each tick checks the credential, the managed device id, and a playback
//! snapshot (whose round-trip time also grades the connection). The poll
//! interval adapts to that grade. Unhealthy samples invoke recovery; a first
//! stall gets one cheap skip before that.

pub mod detection;

pub use detection::{MismatchTracker, StallDetector};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::StatusObserver;
use crate::config::HealthConfig;
use crate::credentials::CredentialProvider;
use crate::error::RecoveryError;
use crate::playback::{PlaybackResume, PlaybackService};
use crate::player::PlayerLifecycle;
use crate::recovery::{RecoveryOutcome, RecoveryTrigger};
use crate::remote::PlayerApi;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceHealthStatus {
    Healthy,
    Unresponsive,
    Disconnected,
    #[default]
    Unknown,
}

/// Connection grade derived from snapshot latency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Unstable,
    Poor,
    #[default]
    Unknown,
}

impl ConnectionQuality {
    /// `None` means the probe failed
    pub fn from_latency(latency: Option<Duration>) -> Self {
        match latency {
            Some(l) if l < Duration::from_millis(500) => Self::Good,
            Some(l) if l < Duration::from_millis(1500) => Self::Unstable,
            Some(_) => Self::Poor,
            None => Self::Unknown,
        }
    }

    pub fn poll_interval(self) -> Duration {
        match self {
            Self::Good => Duration::from_secs(30),
            Self::Unstable => Duration::from_secs(15),
            Self::Poor => Duration::from_secs(10),
            Self::Unknown => Duration::from_secs(5),
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAction {
    None,
    /// Stall observed for the first time; skipped to the next track
    Skipped,
    Recovered(RecoveryOutcome),
    /// A recovery was already running; nothing was sampled
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    pub status: DeviceHealthStatus,
    pub quality: ConnectionQuality,
    pub action: HealthAction,
}

/// Result of classifying one round of probes
enum Verdict {
    Healthy,
    /// Not conclusive; keep the previous status, take no action
    Pending,
    Unknown,
    Stalled(RecoveryError),
    Unhealthy(DeviceHealthStatus, String),
}

struct MonitorState {
    status: DeviceHealthStatus,
    quality: ConnectionQuality,
    stall: StallDetector,
    mismatch: MismatchTracker,
    skipped_stall: bool,
}

pub struct HealthMonitor {
    api: Arc<dyn PlayerApi>,
    lifecycle: Arc<dyn PlayerLifecycle>,
    credentials: Arc<dyn CredentialProvider>,
    trigger: Arc<dyn RecoveryTrigger>,
    playback: Arc<dyn PlaybackResume>,
    queue: PlaybackService,
    observer: Arc<dyn StatusObserver>,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn PlayerApi>,
        lifecycle: Arc<dyn PlayerLifecycle>,
        credentials: Arc<dyn CredentialProvider>,
        trigger: Arc<dyn RecoveryTrigger>,
        playback: Arc<dyn PlaybackResume>,
        queue: PlaybackService,
        observer: Arc<dyn StatusObserver>,
        config: &HealthConfig,
    ) -> Self {
        Self {
            api,
            lifecycle,
            credentials,
            trigger,
            playback,
            queue,
            observer,
            state: Mutex::new(MonitorState {
                status: DeviceHealthStatus::Unknown,
                quality: ConnectionQuality::Unknown,
                stall: StallDetector::from_config(config),
                mismatch: MismatchTracker::new(config.mismatch_threshold),
                skipped_stall: false,
            }),
        }
    }

    pub fn status(&self) -> DeviceHealthStatus {
        self.lock().status
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.lock().quality
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `status` if it differs from the last one
    fn set_status(&self, status: DeviceHealthStatus) {
        let changed = {
            let mut state = self.lock();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            info!(?status, "Device health changed");
            self.observer.on_health_change(status);
        }
    }

    fn sample(&self, action: HealthAction) -> HealthSample {
        let state = self.lock();
        HealthSample {
            status: state.status,
            quality: state.quality,
            action,
        }
    }

    async fn probe(&self) -> Verdict {
        if let Err(e) = self.credentials.access_token().await {
            warn!("Credential unavailable, health unknown: {}", e);
            return Verdict::Unknown;
        }

        let Some(device_id) = self.lifecycle.device_id() else {
            return Verdict::Unhealthy(
                DeviceHealthStatus::Disconnected,
                "no managed device".into(),
            );
        };

        let started = Instant::now();
        let result = self.api.playback_state().await;
        let latency = result.as_ref().ok().map(|_| started.elapsed());
        self.lock().quality = ConnectionQuality::from_latency(latency);

        let snapshot = match result {
            Ok(Some(snapshot)) if snapshot.device.is_some() => snapshot,
            Ok(_) => {
                return Verdict::Unhealthy(
                    DeviceHealthStatus::Disconnected,
                    "remote reports no active device".into(),
                )
            }
            Err(e) => {
                debug!("Snapshot probe failed: {}", e);
                return Verdict::Unknown;
            }
        };

        let mut state = self.lock();
        if state.mismatch.observe(&device_id, snapshot.device_id()) {
            return Verdict::Unhealthy(
                DeviceHealthStatus::Disconnected,
                format!(
                    "remote is playing on {:?}, expected {}",
                    snapshot.device_id(),
                    device_id
                ),
            );
        }
        if state.mismatch.consecutive() > 0 {
            return Verdict::Pending;
        }

        if state.stall.observe(&snapshot) {
            return Verdict::Stalled(RecoveryError::PlaybackStalled {
                position_ms: snapshot.progress_ms.unwrap_or_default(),
            });
        }
        state.skipped_stall = false;
        drop(state);

        if snapshot.is_playing {
            self.playback.remember(&snapshot);
        }
        Verdict::Healthy
    }

    async fn recover(&self, status: DeviceHealthStatus, reason: &str) -> HealthAction {
        self.set_status(status);
        warn!(?status, "Unhealthy playback: {}; starting recovery", reason);
        {
            let mut state = self.lock();
            state.stall.reset();
            state.mismatch.reset();
            state.skipped_stall = false;
        }
        HealthAction::Recovered(self.trigger.recover().await)
    }

    /// Sample once and act on the result
    pub async fn tick(&self) -> HealthSample {
        if self.trigger.is_recovering() {
            debug!("Recovery running, skipping health tick");
            return self.sample(HealthAction::Deferred);
        }

        let action = match self.probe().await {
            Verdict::Healthy => {
                self.set_status(DeviceHealthStatus::Healthy);
                HealthAction::None
            }
            Verdict::Pending => HealthAction::None,
            Verdict::Unknown => {
                self.set_status(DeviceHealthStatus::Unknown);
                HealthAction::None
            }
            Verdict::Unhealthy(status, reason) => self.recover(status, &reason).await,
            Verdict::Stalled(stall) => {
                let first = !std::mem::replace(&mut self.lock().skipped_stall, true);
                if first {
                    self.set_status(DeviceHealthStatus::Unresponsive);
                    info!("{}, skipping to next track", stall);
                    let device_id = self.lifecycle.device_id();
                    match self.queue.next(device_id.as_deref()).await {
                        Ok(()) => HealthAction::Skipped,
                        Err(e) => {
                            self.recover(
                                DeviceHealthStatus::Unresponsive,
                                &format!("{}; skip failed: {}", stall, e),
                            )
                            .await
                        }
                    }
                } else {
                    self.recover(
                        DeviceHealthStatus::Unresponsive,
                        &format!("{} after skip", stall),
                    )
                    .await
                }
            }
        };

        self.sample(action)
    }

    /// Tick until `shutdown`, sleeping per the current connection quality
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Health monitor started");
        loop {
            let sample = self.tick().await;
            let interval = sample.quality.poll_interval();
            debug!(status = ?sample.status, quality = ?sample.quality, ?interval, "Health tick");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Health monitor stopped");
    }
}
