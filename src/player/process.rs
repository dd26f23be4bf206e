//! Child-process playback client
//!
//! Drives a Connect-style receiver binary (librespot by default). The
//! "runtime" is the resolved executable; each client owns one child process.
//! Readiness is reported once the remote device list shows a device with
//! the configured name, since only the remote service knows its device id.
//! Entries listed before the child started may belong to a dead receiver.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Listener, ListenerId, ListenerRegistry, PlayerClient, PlayerEvent, PlayerEventKind,
    PlayerOptions, PlayerSdk, PlayerStateHint,
};
use crate::config::PlayerConfig;
use crate::remote::{DeviceInfo, PlayerApi};

/// How long `disconnect` waits for background tasks to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Polls an inactive, previously listed device must survive before it is trusted
const STALE_CONFIRM_POLLS: u32 = 5;

/// Pick the device our receiver registered as.
///
/// Ids absent from `stale` win outright, then an active one. A stale,
/// inactive id is accepted once it has been listed for `STALE_CONFIRM_POLLS`
/// polls, since receivers may re-register under the same id.
fn pick_device(
    devices: &[DeviceInfo],
    name: &str,
    stale: &HashSet<String>,
    polls: u32,
) -> Option<String> {
    let named: Vec<(&String, bool)> = devices
        .iter()
        .filter(|d| d.name == name)
        .filter_map(|d| d.id.as_ref().map(|id| (id, d.is_active)))
        .collect();
    named
        .iter()
        .find(|(id, _)| !stale.contains(*id))
        .or_else(|| named.iter().find(|(_, active)| *active))
        .or_else(|| named.first().filter(|_| polls >= STALE_CONFIRM_POLLS))
        .map(|(id, _)| (*id).clone())
}

/// Map a line of receiver output to a client event
pub fn classify_output_line(line: &str) -> Option<PlayerEvent> {
    let lower = line.to_lowercase();
    if lower.contains("bad credentials") || lower.contains("authentication failed") {
        return Some(PlayerEvent::AuthenticationError {
            message: line.trim().to_string(),
        });
    }
    if lower.contains("premium") {
        return Some(PlayerEvent::AccountError {
            message: line.trim().to_string(),
        });
    }
    // e.g. `Loading <Song> with Spotify URI <spotify:track:abc>`
    if let Some(start) = line.find("URI <") {
        let rest = &line[start + 5..];
        if let Some(end) = rest.find('>') {
            return Some(PlayerEvent::StateChanged(Some(PlayerStateHint {
                track_uri: Some(rest[..end].to_string()),
                paused: false,
            })));
        }
    }
    None
}

fn resolve_executable(command: &str) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|p| p.is_file())
}

pub struct ProcessPlayerSdk {
    config: PlayerConfig,
    api: Arc<dyn PlayerApi>,
    poll: Duration,
    executable: Mutex<Option<PathBuf>>,
}

impl ProcessPlayerSdk {
    pub fn new(config: PlayerConfig, api: Arc<dyn PlayerApi>, poll: Duration) -> Self {
        Self {
            config,
            api,
            poll,
            executable: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PlayerSdk for ProcessPlayerSdk {
    async fn load(&self) -> Result<()> {
        let resolved = resolve_executable(&self.config.command)
            .ok_or_else(|| anyhow!("player executable {} not found", self.config.command))?;
        info!("Player runtime resolved to {}", resolved.display());
        *self.executable.lock().unwrap_or_else(PoisonError::into_inner) = Some(resolved);
        Ok(())
    }

    fn create(&self, options: PlayerOptions) -> Result<Arc<dyn PlayerClient>> {
        let Some(program) = self
            .executable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            bail!("player runtime not loaded");
        };
        Ok(Arc::new(ProcessPlayerClient {
            program,
            config: self.config.clone(),
            options,
            api: self.api.clone(),
            poll: self.poll,
            registry: Arc::new(ListenerRegistry::default()),
            device_id: Arc::new(Mutex::new(None)),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }
}

pub struct ProcessPlayerClient {
    program: PathBuf,
    config: PlayerConfig,
    options: PlayerOptions,
    api: Arc<dyn PlayerApi>,
    poll: Duration,
    registry: Arc<ListenerRegistry>,
    device_id: Arc<Mutex<Option<String>>>,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessPlayerClient {
    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn spawn_output_reader<R>(&self, stream: R, label: &'static str)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        self.track(tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            debug!(target: "jukebox_recovery::player::output", "[{}] {}", label, line);
                            if let Some(event) = classify_output_line(&line) {
                                registry.emit(&event);
                            }
                        }
                        Ok(None) | Err(_) => break,
                    },
                }
            }
        }));
    }

    /// Ids already listed under our name before the child starts
    async fn listed_ids(&self) -> HashSet<String> {
        match self.api.devices().await {
            Ok(devices) => devices
                .into_iter()
                .filter(|d| d.name == self.options.name)
                .filter_map(|d| d.id)
                .collect(),
            Err(e) => {
                debug!("Could not list devices before start: {}", e);
                HashSet::new()
            }
        }
    }

    /// Poll the remote device list until our name shows up, then report ready
    fn spawn_discovery(&self, stale: HashSet<String>) {
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        let api = self.api.clone();
        let name = self.options.name.clone();
        let device_id = self.device_id.clone();
        let poll = self.poll;
        self.track(tokio::spawn(async move {
            let mut polls = 0;
            loop {
                match api.devices().await {
                    Ok(devices) => {
                        polls += 1;
                        if let Some(id) = pick_device(&devices, &name, &stale, polls) {
                            *device_id.lock().unwrap_or_else(PoisonError::into_inner) =
                                Some(id.clone());
                            registry.emit(&PlayerEvent::Ready { device_id: id });
                            return;
                        }
                    }
                    Err(e) => debug!("Device discovery poll failed: {}", e),
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }));
    }
}

#[async_trait]
impl PlayerClient for ProcessPlayerClient {
    fn add_listener(&self, kind: PlayerEventKind, listener: Listener) -> ListenerId {
        self.registry.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }

    fn listener_count(&self, kind: PlayerEventKind) -> usize {
        self.registry.count(kind)
    }

    async fn connect(&self) -> Result<bool> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(true);
        }

        let token = match self.options.credentials.access_token().await {
            Ok(token) => token,
            Err(e) => {
                self.registry.emit(&PlayerEvent::AuthenticationError {
                    message: e.to_string(),
                });
                self.running.store(false, Ordering::Release);
                return Ok(false);
            }
        };

        let stale = self.listed_ids().await;
        if !stale.is_empty() {
            debug!(?stale, "Devices already listed under our name");
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.config.args)
            .arg(&self.config.name_flag)
            .arg(&self.options.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.config.token_flag.is_empty() {
            command.arg(&self.config.token_flag).arg(token);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.registry.emit(&PlayerEvent::InitializationError {
                    message: format!("failed to start {}: {}", self.program.display(), e),
                });
                self.running.store(false, Ordering::Release);
                return Ok(false);
            }
        };
        info!(pid = ?child.id(), "Started player process");

        if let Some(stdout) = child.stdout.take() {
            self.spawn_output_reader(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_output_reader(stderr, "stderr");
        }

        // Supervise the child: report not-ready on exit, kill on disconnect
        let registry = self.registry.clone();
        let cancel = self.cancel.clone();
        let device_id = self.device_id.clone();
        self.track(tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    warn!("Player process exited: {:?}", status);
                    let id = device_id.lock().unwrap_or_else(PoisonError::into_inner).take();
                    match id {
                        Some(device_id) => registry.emit(&PlayerEvent::NotReady { device_id }),
                        None => registry.emit(&PlayerEvent::InitializationError {
                            message: format!("player process exited early: {:?}", status),
                        }),
                    }
                }
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill player process: {}", e);
                    }
                }
            }
        }));

        self.spawn_discovery(stale);
        Ok(true)
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                abort.abort();
            }
        }
        self.running.store(false, Ordering::Release);
        debug!("Player process client disconnected");
    }
}
