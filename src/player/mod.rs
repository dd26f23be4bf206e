//! Playback client abstraction
//!
//! A `PlayerSdk` is the runtime that can construct playback clients; a
//! `PlayerClient` is one live receiver that registers itself as a device
//! with the remote service and reports lifecycle events to listeners.

pub mod lifecycle;
pub mod process;

pub use lifecycle::{PlayerLifecycle, PlayerLifecycleService};
pub use process::ProcessPlayerSdk;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::credentials::CredentialProvider;

/// Lifecycle status of the current client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Uninitialized,
    Initializing,
    Verifying,
    Ready,
    Error,
}

/// Event categories a client can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    Ready,
    NotReady,
    InitializationError,
    AuthenticationError,
    AccountError,
    StateChanged,
}

impl PlayerEventKind {
    pub const ALL: [PlayerEventKind; 6] = [
        PlayerEventKind::Ready,
        PlayerEventKind::NotReady,
        PlayerEventKind::InitializationError,
        PlayerEventKind::AuthenticationError,
        PlayerEventKind::AccountError,
        PlayerEventKind::StateChanged,
    ];
}

/// Local player state hint carried by `StateChanged`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStateHint {
    pub track_uri: Option<String>,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Ready { device_id: String },
    NotReady { device_id: String },
    InitializationError { message: String },
    AuthenticationError { message: String },
    AccountError { message: String },
    StateChanged(Option<PlayerStateHint>),
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            Self::Ready { .. } => PlayerEventKind::Ready,
            Self::NotReady { .. } => PlayerEventKind::NotReady,
            Self::InitializationError { .. } => PlayerEventKind::InitializationError,
            Self::AuthenticationError { .. } => PlayerEventKind::AuthenticationError,
            Self::AccountError { .. } => PlayerEventKind::AccountError,
            Self::StateChanged(_) => PlayerEventKind::StateChanged,
        }
    }
}

pub type Listener = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Options for constructing a client
#[derive(Clone)]
pub struct PlayerOptions {
    /// Device name the client registers under
    pub name: String,
    pub credentials: Arc<dyn CredentialProvider>,
}

#[async_trait]
pub trait PlayerSdk: Send + Sync {
    /// Load (or reload from scratch) the client runtime
    async fn load(&self) -> Result<()>;

    /// Construct a client instance. Requires a loaded runtime.
    fn create(&self, options: PlayerOptions) -> Result<Arc<dyn PlayerClient>>;
}

#[async_trait]
pub trait PlayerClient: Send + Sync {
    fn add_listener(&self, kind: PlayerEventKind, listener: Listener) -> ListenerId;

    /// Returns false if the id was not registered
    fn remove_listener(&self, id: ListenerId) -> bool;

    fn listener_count(&self, kind: PlayerEventKind) -> usize;

    /// Start the client. `Ok(false)` means the runtime refused to connect.
    async fn connect(&self) -> Result<bool>;

    async fn disconnect(&self);
}

/// Listener bookkeeping shared by client implementations
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, PlayerEventKind, Listener)>>,
}

impl ListenerRegistry {
    pub fn add(&self, kind: PlayerEventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    pub fn count(&self, kind: PlayerEventKind) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    /// Deliver an event to every listener of its kind
    pub fn emit(&self, event: &PlayerEvent) {
        // Snapshot first so a listener may add/remove listeners re-entrantly
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in targets {
            listener(event);
        }
    }
}
