//! DeviceManager - makes sure the managed device is registered and active
//!
//! `check_device` is the one-shot readiness check used at startup and by the
//! API. The `DeviceControl` methods are the bounded polling primitives the
//! recovery orchestrator walks through during a cycle. A check never runs
//! while a recovery cycle owns the player.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, Result};
use crate::player::PlayerLifecycle;
use crate::recovery::RecoveryTrigger;
use crate::remote::{DeviceInfo, PlayerApi};

/// Device steps of a recovery cycle
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Poll the remote device list until `device_id` appears
    async fn wait_for_registration(&self, device_id: &str) -> Result<()>;

    /// Move control to `device_id` unless it already has it
    async fn transfer_to_device(&self, device_id: &str) -> Result<()>;

    /// Poll until `device_id` is the active device
    async fn wait_for_activation(&self, device_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceCheckState {
    pub is_ready: bool,
    pub is_transferring: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeviceTimeouts {
    pub registration: Duration,
    pub activation: Duration,
    pub poll: Duration,
}

impl DeviceTimeouts {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            registration: config.registration_timeout(),
            activation: config.activation_timeout(),
            poll: config.device_poll(),
        }
    }
}

impl Default for DeviceTimeouts {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

/// Re-run `probe` every `poll` until it yields true or `limit` elapses.
/// Probe errors count as "not yet".
pub(crate) async fn poll_until<F, Fut>(limit: Duration, poll: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    tokio::time::timeout(limit, async {
        loop {
            match probe().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => debug!("Poll probe failed: {}", e),
            }
            tokio::time::sleep(poll).await;
        }
    })
    .await
    .is_ok()
}

fn find<'a>(devices: &'a [DeviceInfo], device_id: &str) -> Option<&'a DeviceInfo> {
    devices.iter().find(|d| d.id.as_deref() == Some(device_id))
}

pub struct DeviceManager {
    lifecycle: Arc<dyn PlayerLifecycle>,
    api: Arc<dyn PlayerApi>,
    timeouts: DeviceTimeouts,
    state: Mutex<DeviceCheckState>,
    recovery: OnceLock<Weak<dyn RecoveryTrigger>>,
}

impl DeviceManager {
    pub fn new(
        lifecycle: Arc<dyn PlayerLifecycle>,
        api: Arc<dyn PlayerApi>,
        timeouts: DeviceTimeouts,
    ) -> Self {
        Self {
            lifecycle,
            api,
            timeouts,
            state: Mutex::new(DeviceCheckState::default()),
            recovery: OnceLock::new(),
        }
    }

    /// Refuse checks while `recovery` reports a cycle in flight.
    /// The orchestrator is built on top of this manager, so it is attached late.
    pub fn defer_to(&self, recovery: Weak<dyn RecoveryTrigger>) {
        if self.recovery.set(recovery).is_err() {
            warn!("Device manager already defers to a recovery trigger");
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        let recovering = self
            .recovery
            .get()
            .and_then(Weak::upgrade)
            .is_some_and(|r| r.is_recovering());
        if recovering {
            Err(RecoveryError::Busy("recovery"))
        } else {
            Ok(())
        }
    }

    pub fn state(&self) -> DeviceCheckState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut DeviceCheckState)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Confirm the managed device is known, active and reported by playback.
    ///
    /// Refreshes the client at most once when the device is missing. Never
    /// retries otherwise; the reason for a `false` lands in `state().error`.
    pub async fn check_device(&self) -> bool {
        self.update(|s| {
            s.is_ready = false;
            s.error = None;
        });

        match self.run_check().await {
            Ok(()) => {
                self.update(|s| s.is_ready = true);
                info!("Device check passed");
                true
            }
            Err(e) => {
                warn!("Device check failed: {}", e);
                self.update(|s| s.error = Some(e.to_string()));
                false
            }
        }
    }

    async fn run_check(&self) -> Result<()> {
        self.ensure_idle()?;
        let (device_id, device) = match self.locate().await? {
            Some(found) => found,
            None => {
                self.ensure_idle()?;
                info!("Managed device not registered, refreshing player client once");
                self.lifecycle.create_player().await?;
                self.locate().await?.ok_or_else(|| {
                    RecoveryError::DeviceNotFound(
                        self.lifecycle.device_id().unwrap_or_default(),
                    )
                })?
            }
        };

        if !device.is_active {
            self.ensure_idle()?;
            self.update(|s| s.is_transferring = true);
            let transferred = self.lifecycle.transfer_playback(&device_id).await;
            self.update(|s| s.is_transferring = false);
            transferred?;
        }

        let snapshot = self.api.playback_state().await?;
        if snapshot.as_ref().and_then(|s| s.device_id()).is_none() {
            return Err(RecoveryError::DeviceMismatch {
                expected: device_id,
                actual: None,
            });
        }
        Ok(())
    }

    /// Current managed id and its remote entry, if both exist
    async fn locate(&self) -> Result<Option<(String, DeviceInfo)>> {
        let Some(device_id) = self.lifecycle.device_id() else {
            return Ok(None);
        };
        let devices = self.api.devices().await?;
        Ok(find(&devices, &device_id).cloned().map(|d| (device_id, d)))
    }
}

#[async_trait]
impl DeviceControl for DeviceManager {
    async fn wait_for_registration(&self, device_id: &str) -> Result<()> {
        let api = &self.api;
        let registered = poll_until(
            self.timeouts.registration,
            self.timeouts.poll,
            move || async move {
                let devices = api.devices().await?;
                Ok::<_, RecoveryError>(find(&devices, device_id).is_some())
            },
        )
        .await;
        if registered {
            debug!(device_id, "Device registered");
            Ok(())
        } else {
            Err(RecoveryError::DeviceRegistrationTimeout {
                device_id: device_id.to_string(),
                waited: self.timeouts.registration,
            })
        }
    }

    async fn transfer_to_device(&self, device_id: &str) -> Result<()> {
        let devices = self.api.devices().await?;
        if find(&devices, device_id).is_some_and(|d| d.is_active) {
            debug!(device_id, "Device already active, no transfer needed");
            return Ok(());
        }
        self.update(|s| s.is_transferring = true);
        let result = self.lifecycle.transfer_playback(device_id).await;
        self.update(|s| s.is_transferring = false);
        result
    }

    async fn wait_for_activation(&self, device_id: &str) -> Result<()> {
        let api = &self.api;
        let active = poll_until(
            self.timeouts.activation,
            self.timeouts.poll,
            move || async move {
                let devices = api.devices().await?;
                Ok::<_, RecoveryError>(find(&devices, device_id).is_some_and(|d| d.is_active))
            },
        )
        .await;
        if active {
            Ok(())
        } else {
            Err(RecoveryError::DeviceActivationTimeout {
                device_id: device_id.to_string(),
                waited: self.timeouts.activation,
            })
        }
    }
}
