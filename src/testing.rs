//! In-process fakes for the remote API and the player runtime (unit tests only)

use anyhow::bail;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{RecoveryError, Result};
use crate::player::{
    Listener, ListenerId, ListenerRegistry, PlayerClient, PlayerEvent, PlayerEventKind,
    PlayerLifecycle, PlayerOptions, PlayerSdk, PlayerStatus,
};
use crate::remote::{DeviceInfo, PlayRequest, PlaybackSnapshot, PlayerApi};

pub struct MockPlayerApi {
    devices: Mutex<Vec<DeviceInfo>>,
    snapshot: Mutex<Option<PlaybackSnapshot>>,
    transfer_delay: Mutex<Duration>,
    command_delay: Mutex<Duration>,
    fail_transport: AtomicBool,
    fail_play: AtomicBool,
    activate_on_transfer: AtomicBool,
    pub plays: Mutex<Vec<(Option<String>, PlayRequest)>>,
    /// Command names in the order the remote received them
    pub commands: Mutex<Vec<String>>,
    pub state_calls: AtomicUsize,
    pub device_calls: AtomicUsize,
    pub transfer_calls: AtomicUsize,
    pub next_calls: AtomicUsize,
}

impl MockPlayerApi {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            snapshot: Mutex::new(None),
            transfer_delay: Mutex::new(Duration::ZERO),
            command_delay: Mutex::new(Duration::ZERO),
            fail_transport: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
            activate_on_transfer: AtomicBool::new(true),
            plays: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            state_calls: AtomicUsize::new(0),
            device_calls: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
            next_calls: AtomicUsize::new(0),
        }
    }

    /// Insert or update a device
    pub fn add_device(&self, id: &str, name: &str, is_active: bool) {
        let mut devices = self.devices.lock().unwrap();
        devices.retain(|d| d.id.as_deref() != Some(id));
        devices.push(DeviceInfo {
            id: Some(id.to_string()),
            name: name.to_string(),
            is_active,
            device_type: Some("Speaker".into()),
        });
    }

    pub fn remove_device(&self, id: &str) {
        self.devices
            .lock()
            .unwrap()
            .retain(|d| d.id.as_deref() != Some(id));
    }

    pub fn set_snapshot(&self, snapshot: Option<PlaybackSnapshot>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = delay;
    }

    pub fn set_command_delay(&self, delay: Duration) {
        *self.command_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn set_activate_on_transfer(&self, activate: bool) {
        self.activate_on_transfer.store(activate, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn check_transport(&self) -> Result<()> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(RecoveryError::Transport("connection refused".into()));
        }
        Ok(())
    }

    async fn command(&self, name: String) -> Result<()> {
        self.check_transport()?;
        let delay = *self.command_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.commands.lock().unwrap().push(name);
        Ok(())
    }
}

#[async_trait]
impl PlayerApi for MockPlayerApi {
    async fn playback_state(&self) -> Result<Option<PlaybackSnapshot>> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        self.check_transport()?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.device_calls.fetch_add(1, Ordering::SeqCst);
        self.check_transport()?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn transfer_playback(&self, device_id: &str) -> Result<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.transfer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_transport()?;
        if self.activate_on_transfer.load(Ordering::SeqCst) {
            let mut devices = self.devices.lock().unwrap();
            for device in devices.iter_mut() {
                device.is_active = device.id.as_deref() == Some(device_id);
            }
        }
        self.commands
            .lock()
            .unwrap()
            .push(format!("transfer:{}", device_id));
        Ok(())
    }

    async fn play(&self, device_id: Option<&str>, request: &PlayRequest) -> Result<()> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(RecoveryError::Transport("play rejected".into()));
        }
        self.command("play".into()).await?;
        self.plays
            .lock()
            .unwrap()
            .push((device_id.map(str::to_string), request.clone()));
        Ok(())
    }

    async fn pause(&self, _device_id: Option<&str>) -> Result<()> {
        self.command("pause".into()).await
    }

    async fn next(&self, _device_id: Option<&str>) -> Result<()> {
        self.next_calls.fetch_add(1, Ordering::SeqCst);
        self.command("next".into()).await
    }

    async fn previous(&self, _device_id: Option<&str>) -> Result<()> {
        self.command("previous".into()).await
    }

    async fn seek(&self, _device_id: Option<&str>, position_ms: u64) -> Result<()> {
        self.command(format!("seek:{}", position_ms)).await
    }
}

/// How fake clients behave when connected
#[derive(Debug, Clone)]
pub enum ReadyBehavior {
    /// Report ready with this device id (and register it remotely if an API is attached)
    Ready(String),
    /// Connect but never report anything
    Never,
    AuthError(String),
    /// `connect` returns false
    Refuse,
}

pub struct FakeSdk {
    behavior: Mutex<ReadyBehavior>,
    api: Option<Arc<MockPlayerApi>>,
    fail_load: AtomicBool,
    clients: Mutex<Vec<Arc<FakeClient>>>,
    pub load_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
}

impl FakeSdk {
    pub fn new(behavior: ReadyBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            api: None,
            fail_load: AtomicBool::new(false),
            clients: Mutex::new(Vec::new()),
            load_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_api(mut self, api: Arc<MockPlayerApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn set_behavior(&self, behavior: ReadyBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn last_client(&self) -> Option<Arc<FakeClient>> {
        self.clients.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PlayerSdk for FakeSdk {
    async fn load(&self) -> anyhow::Result<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            bail!("script failed to load");
        }
        Ok(())
    }

    fn create(&self, options: PlayerOptions) -> anyhow::Result<Arc<dyn PlayerClient>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let client = Arc::new(FakeClient {
            name: options.name,
            behavior: self.behavior.lock().unwrap().clone(),
            api: self.api.clone(),
            registry: ListenerRegistry::default(),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

pub struct FakeClient {
    name: String,
    behavior: ReadyBehavior,
    api: Option<Arc<MockPlayerApi>>,
    registry: ListenerRegistry,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
}

impl FakeClient {
    pub fn emit(&self, event: &PlayerEvent) {
        self.registry.emit(event);
    }
}

#[async_trait]
impl PlayerClient for FakeClient {
    fn add_listener(&self, kind: PlayerEventKind, listener: Listener) -> ListenerId {
        self.registry.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    fn listener_count(&self, kind: PlayerEventKind) -> usize {
        self.registry.count(kind)
    }

    async fn connect(&self) -> anyhow::Result<bool> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ReadyBehavior::Ready(device_id) => {
                if let Some(api) = &self.api {
                    api.add_device(device_id, &self.name, false);
                }
                self.registry.emit(&PlayerEvent::Ready {
                    device_id: device_id.clone(),
                });
                Ok(true)
            }
            ReadyBehavior::Never => Ok(true),
            ReadyBehavior::AuthError(message) => {
                self.registry.emit(&PlayerEvent::AuthenticationError {
                    message: message.clone(),
                });
                Ok(true)
            }
            ReadyBehavior::Refuse => Ok(false),
        }
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Lifecycle stand-in: `create_player` brings back the assigned device id
#[derive(Default)]
pub struct StubLifecycle {
    assigned: Mutex<Option<String>>,
    device_id: Mutex<Option<String>>,
    create_delay: Mutex<Duration>,
}

impl StubLifecycle {
    pub fn with_device(device_id: &str) -> Self {
        let stub = Self::default();
        stub.set_device(Some(device_id));
        stub
    }

    pub fn set_device(&self, device_id: Option<&str>) {
        *self.assigned.lock().unwrap() = device_id.map(str::to_string);
        *self.device_id.lock().unwrap() = device_id.map(str::to_string);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl PlayerLifecycle for StubLifecycle {
    async fn destroy(&self) {
        *self.device_id.lock().unwrap() = None;
    }

    async fn reload_sdk(&self) -> Result<()> {
        Ok(())
    }

    async fn create_player(&self) -> Result<String> {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let assigned = self.assigned.lock().unwrap().clone();
        *self.device_id.lock().unwrap() = assigned.clone();
        assigned.ok_or_else(|| RecoveryError::ClientInit("no device".into()))
    }

    async fn verify_device(&self, _device_id: &str) -> Result<()> {
        Ok(())
    }

    async fn transfer_playback(&self, _device_id: &str) -> Result<()> {
        Ok(())
    }

    fn device_id(&self) -> Option<String> {
        self.device_id.lock().unwrap().clone()
    }

    fn status(&self) -> PlayerStatus {
        if self.device_id().is_some() {
            PlayerStatus::Ready
        } else {
            PlayerStatus::Uninitialized
        }
    }

    fn init_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}
