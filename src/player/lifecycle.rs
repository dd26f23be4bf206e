//! PlayerLifecycleService - sole owner of the playback client
//!
//! The service loads the runtime once, constructs a client, registers the
//! full listener set and walks the client through
//! `uninitialized → initializing → verifying → ready | error`.
//! No other component holds the client across a recovery cycle; they see it
//! only through the accessors on `PlayerLifecycle`.
//!
//! Each constructed client gets a generation number. Listener callbacks and
//! in-flight initialization check it before applying any effect, so events
//! from a client that has since been destroyed are ignored.

use async_trait::async_trait;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ListenerId, PlayerClient, PlayerEvent, PlayerEventKind, PlayerOptions, PlayerSdk,
    PlayerStateHint, PlayerStatus,
};
use crate::bus::{BusEvent, SharedBus};
use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, Result};
use crate::guard::FlagGuard;
use crate::remote::PlayerApi;

/// Narrow contract the rest of the system uses to reach the client
#[async_trait]
pub trait PlayerLifecycle: Send + Sync {
    /// Tear down the client. Idempotent.
    async fn destroy(&self);

    /// Reload the runtime from scratch
    async fn reload_sdk(&self) -> Result<()>;

    /// Construct a client and wait until it is ready; returns its device id
    async fn create_player(&self) -> Result<String>;

    /// Bounded check that `device_id` is visible to the remote service
    async fn verify_device(&self, device_id: &str) -> Result<()>;

    /// Ask the remote service to move control to `device_id`
    async fn transfer_playback(&self, device_id: &str) -> Result<()>;

    fn device_id(&self) -> Option<String>;

    fn status(&self) -> PlayerStatus;

    /// Upper bound `create_player` enforces on itself
    fn init_timeout(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct LifecycleTimeouts {
    pub init: Duration,
    pub verify: Duration,
    pub poll: Duration,
}

impl LifecycleTimeouts {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            init: config.init_timeout(),
            verify: config.verify_timeout(),
            poll: config.device_poll(),
        }
    }
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

struct Inner {
    generation: u64,
    client: Option<Arc<dyn PlayerClient>>,
    listeners: Vec<ListenerId>,
    /// Cancels waits belonging to the current client
    cancel: CancellationToken,
    ready_tx: Option<oneshot::Sender<Result<String>>>,
    device_id: Option<String>,
    status: PlayerStatus,
    last_error: Option<String>,
    last_state: Option<PlayerStateHint>,
    sdk_loaded: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            generation: 0,
            client: None,
            listeners: Vec::new(),
            cancel: CancellationToken::new(),
            ready_tx: None,
            device_id: None,
            status: PlayerStatus::Uninitialized,
            last_error: None,
            last_state: None,
            sdk_loaded: false,
        }
    }
}

/// State shared with listener callbacks
struct Shared {
    inner: Mutex<Inner>,
    bus: SharedBus,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_status(&self, status: PlayerStatus, device_id: Option<String>) {
        self.bus
            .publish(BusEvent::PlayerStatusChanged { status, device_id });
    }

    /// Set status for `generation` if it is still current
    fn set_status(&self, generation: u64, status: PlayerStatus, error: Option<String>) {
        let device_id = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.status = status;
            if error.is_some() {
                inner.last_error = error;
            }
            inner.device_id.clone()
        };
        self.publish_status(status, device_id);
    }

    fn handle_event(&self, generation: u64, event: &PlayerEvent) {
        let mut published = None;
        {
            let mut inner = self.lock();
            if inner.generation != generation || inner.client.is_none() {
                debug!(?event, "Ignoring event from stale player client");
                return;
            }

            match event {
                PlayerEvent::Ready { device_id } => {
                    info!(device_id = %device_id, "Player client ready");
                    inner.device_id = Some(device_id.clone());
                    if let Some(tx) = inner.ready_tx.take() {
                        let _ = tx.send(Ok(device_id.clone()));
                    }
                }
                PlayerEvent::NotReady { device_id } => {
                    warn!(device_id = %device_id, "Player device went offline");
                    if inner.device_id.as_deref() == Some(device_id.as_str()) {
                        inner.device_id = None;
                    }
                    inner.last_error = Some(format!("device {} went offline", device_id));
                    if inner.status == PlayerStatus::Ready {
                        inner.status = PlayerStatus::Error;
                        published = Some(PlayerStatus::Error);
                    }
                }
                PlayerEvent::InitializationError { message }
                | PlayerEvent::AuthenticationError { message }
                | PlayerEvent::AccountError { message } => {
                    warn!(kind = ?event.kind(), "Player client error: {}", message);
                    inner.last_error = Some(message.clone());
                    if let Some(tx) = inner.ready_tx.take() {
                        let _ = tx.send(Err(RecoveryError::ClientInit(message.clone())));
                    }
                    inner.status = PlayerStatus::Error;
                    published = Some(PlayerStatus::Error);
                }
                PlayerEvent::StateChanged(hint) => {
                    inner.last_state = hint.clone();
                }
            }
        }

        if let Some(status) = published {
            self.publish_status(status, None);
        }
    }
}

pub struct PlayerLifecycleService {
    sdk: Arc<dyn PlayerSdk>,
    api: Arc<dyn PlayerApi>,
    options: PlayerOptions,
    timeouts: LifecycleTimeouts,
    shared: Arc<Shared>,
    /// Serializes runtime loads
    load_lock: tokio::sync::Mutex<()>,
    verifying: AtomicBool,
    transferring: AtomicBool,
}

impl PlayerLifecycleService {
    pub fn new(
        sdk: Arc<dyn PlayerSdk>,
        api: Arc<dyn PlayerApi>,
        options: PlayerOptions,
        timeouts: LifecycleTimeouts,
        bus: SharedBus,
    ) -> Self {
        Self {
            sdk,
            api,
            options,
            timeouts,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                bus,
            }),
            load_lock: tokio::sync::Mutex::new(()),
            verifying: AtomicBool::new(false),
            transferring: AtomicBool::new(false),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Most recent state reported by the client itself
    pub fn last_state(&self) -> Option<PlayerStateHint> {
        self.shared.lock().last_state.clone()
    }

    pub fn has_client(&self) -> bool {
        self.shared.lock().client.is_some()
    }

    /// Load the runtime unless it already is
    async fn ensure_sdk_loaded(&self) -> Result<()> {
        let _load = self.load_lock.lock().await;
        if self.shared.lock().sdk_loaded {
            return Ok(());
        }
        self.sdk
            .load()
            .await
            .map_err(|e| RecoveryError::ClientInit(format!("runtime load failed: {}", e)))?;
        self.shared.lock().sdk_loaded = true;
        info!("Player runtime loaded");
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.lock().generation == generation
    }

    /// Steps after construction: connect, await ready, verify, transfer
    async fn initialize(
        &self,
        generation: u64,
        client: Arc<dyn PlayerClient>,
        ready_rx: oneshot::Receiver<Result<String>>,
    ) -> Result<String> {
        let connected = client
            .connect()
            .await
            .map_err(|e| RecoveryError::ClientInit(format!("connect failed: {}", e)))?;
        if !connected {
            return Err(RecoveryError::ClientInit(
                "player client refused to connect".into(),
            ));
        }

        let device_id = ready_rx.await.map_err(|_| {
            RecoveryError::ClientInit("player client dropped before ready".into())
        })??;

        if !self.is_current(generation) {
            return Err(RecoveryError::ClientInit(
                "player client replaced during initialization".into(),
            ));
        }
        self.shared
            .set_status(generation, PlayerStatus::Verifying, None);

        self.verify_device(&device_id).await?;
        self.transfer_playback(&device_id).await?;

        if !self.is_current(generation) {
            return Err(RecoveryError::ClientInit(
                "player client replaced during verification".into(),
            ));
        }
        Ok(device_id)
    }
}

#[async_trait]
impl PlayerLifecycle for PlayerLifecycleService {
    async fn destroy(&self) {
        let (client, listeners) = {
            let mut inner = self.shared.lock();
            inner.cancel.cancel();
            inner.ready_tx = None;
            let Some(client) = inner.client.take() else {
                return;
            };
            inner.generation += 1;
            inner.device_id = None;
            inner.last_state = None;
            inner.status = PlayerStatus::Uninitialized;
            (client, std::mem::take(&mut inner.listeners))
        };

        let registered = listeners.len();
        for id in listeners {
            client.remove_listener(id);
        }
        client.disconnect().await;

        info!(listeners = registered, "Player client destroyed");
        self.shared.publish_status(PlayerStatus::Uninitialized, None);
    }

    async fn reload_sdk(&self) -> Result<()> {
        self.shared.lock().sdk_loaded = false;
        self.ensure_sdk_loaded().await
    }

    async fn create_player(&self) -> Result<String> {
        self.ensure_sdk_loaded().await?;
        self.destroy().await;

        let client = self
            .sdk
            .create(self.options.clone())
            .map_err(|e| RecoveryError::ClientInit(format!("client construction failed: {}", e)))?;

        let (generation, cancel, ready_rx) = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            let generation = inner.generation;
            inner.cancel = CancellationToken::new();
            let (ready_tx, ready_rx) = oneshot::channel();
            inner.ready_tx = Some(ready_tx);

            for kind in PlayerEventKind::ALL {
                let shared = Arc::clone(&self.shared);
                let id = client.add_listener(
                    kind,
                    Arc::new(move |event| shared.handle_event(generation, event)),
                );
                inner.listeners.push(id);
            }

            inner.client = Some(client.clone());
            inner.device_id = None;
            inner.last_error = None;
            inner.status = PlayerStatus::Initializing;
            (generation, inner.cancel.clone(), ready_rx)
        };
        self.shared.publish_status(PlayerStatus::Initializing, None);
        info!(generation, name = %self.options.name, "Creating player client");

        let init_timeout = self.timeouts.init;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(RecoveryError::ClientInit(
                "player client destroyed during initialization".into(),
            )),
            outcome = tokio::time::timeout(
                init_timeout,
                self.initialize(generation, client, ready_rx),
            ) => outcome.unwrap_or(Err(RecoveryError::ClientInitTimeout(init_timeout))),
        };

        match &result {
            Ok(device_id) => {
                info!(device_id = %device_id, "Player client verified and active");
                self.shared.set_status(generation, PlayerStatus::Ready, None);
            }
            Err(e) => {
                warn!("Player client initialization failed: {}", e);
                self.shared
                    .set_status(generation, PlayerStatus::Error, Some(e.to_string()));
            }
        }
        result
    }

    async fn verify_device(&self, device_id: &str) -> Result<()> {
        let Some(_verifying) = FlagGuard::try_acquire(&self.verifying) else {
            return Err(RecoveryError::Busy("device verification"));
        };

        let poll = self.timeouts.poll;
        let found = tokio::time::timeout(self.timeouts.verify, async {
            loop {
                match self.api.devices().await {
                    Ok(devices) => {
                        if devices
                            .iter()
                            .any(|d| d.id.as_deref() == Some(device_id))
                        {
                            return;
                        }
                        debug!(device_id, "Device not yet visible remotely");
                    }
                    Err(e) => debug!("Device list failed during verification: {}", e),
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        found.map_err(|_| RecoveryError::DeviceNotFound(device_id.to_string()))
    }

    async fn transfer_playback(&self, device_id: &str) -> Result<()> {
        let Some(_transferring) = FlagGuard::try_acquire(&self.transferring) else {
            return Err(RecoveryError::Busy("device transfer"));
        };
        info!(device_id, "Transferring playback");
        self.api.transfer_playback(device_id).await
    }

    fn device_id(&self) -> Option<String> {
        self.shared.lock().device_id.clone()
    }

    fn status(&self) -> PlayerStatus {
        self.shared.lock().status
    }

    fn init_timeout(&self) -> Duration {
        self.timeouts.init
    }
}
