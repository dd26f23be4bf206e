//! PlaybackService - one-at-a-time execution of playback commands
//!
//! Callers submit commands from anywhere; a single worker task runs them
//! against the remote API in submission order and answers each caller on its
//! own oneshot.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{RecoveryError, Result};
use crate::remote::{PlayRequest, PlayerApi};

const QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Play(PlayRequest),
    Pause,
    Next,
    Previous,
    Seek(u64),
}

struct Job {
    device_id: Option<String>,
    command: PlaybackCommand,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Clone)]
pub struct PlaybackService {
    tx: mpsc::Sender<Job>,
}

impl PlaybackService {
    /// Start the worker. It stops when `shutdown` fires or every handle is dropped.
    pub fn spawn(api: Arc<dyn PlayerApi>, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = tokio::spawn(run_worker(api, rx, shutdown));
        (Self { tx }, worker)
    }

    /// Queue a command and wait for its result
    pub async fn submit(&self, device_id: Option<&str>, command: PlaybackCommand) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job {
                device_id: device_id.map(str::to_string),
                command,
                reply,
            })
            .await
            .map_err(|_| RecoveryError::Transport("playback queue closed".into()))?;
        rx.await
            .map_err(|_| RecoveryError::Transport("playback queue dropped command".into()))?
    }

    pub async fn play(&self, device_id: Option<&str>, request: PlayRequest) -> Result<()> {
        self.submit(device_id, PlaybackCommand::Play(request)).await
    }

    pub async fn next(&self, device_id: Option<&str>) -> Result<()> {
        self.submit(device_id, PlaybackCommand::Next).await
    }
}

async fn run_worker(
    api: Arc<dyn PlayerApi>,
    mut rx: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let device = job.device_id.as_deref();
        debug!(?device, command = ?job.command, "Executing playback command");
        let result = match &job.command {
            PlaybackCommand::Play(request) => api.play(device, request).await,
            PlaybackCommand::Pause => api.pause(device).await,
            PlaybackCommand::Next => api.next(device).await,
            PlaybackCommand::Previous => api.previous(device).await,
            PlaybackCommand::Seek(position_ms) => api.seek(device, *position_ms).await,
        };
        // Caller may have given up
        let _ = job.reply.send(result);
    }
    info!("Playback queue stopped");
}
