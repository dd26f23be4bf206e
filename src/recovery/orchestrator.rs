//! RecoveryOrchestrator - drives the playback stack back to a working state
//!
//! A cycle walks `destroying → reloading_client → creating_player →
//! registering_device → restoring_playback → success`, or drops to `error`
//! from whichever phase failed. Every state change goes through
//! `RecoveryState::apply`, is persisted and is reported to the observer.
//!
//! Entry is gated three ways, in this order: a single-flight flag taken
//! before the first await, the attempt budget (exhausting it escalates to a
//! hard reload), and the circuit breaker.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CircuitBreaker, RecoveryPhase, RecoveryState, ResumeStrategy, Transition};
use crate::bus::StatusObserver;
use crate::config::RecoveryConfig;
use crate::device::DeviceControl;
use crate::error::{RecoveryError, Result};
use crate::guard::FlagGuard;
use crate::playback::PlaybackResume;
use crate::player::{PlayerLifecycle, PlayerStatus};
use crate::store::{self, KeyValueStore, RECOVERY_STATE_KEY};

/// Last-resort escalation once the attempt budget is spent
pub trait HardReloader: Send + Sync {
    fn hard_reload(&self, attempts: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyRunning,
    CircuitOpen,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Skipped(SkipReason),
    Succeeded(ResumeStrategy),
    Failed(String),
    Exhausted,
}

/// What the health monitor (and the API) can ask of the orchestrator
#[async_trait]
pub trait RecoveryTrigger: Send + Sync {
    async fn recover(&self) -> RecoveryOutcome;
    fn is_recovering(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_attempts: u32,
    pub success_clear: Duration,
    pub error_clear: Duration,
    /// Slack added on top of the lifecycle's own init timeout
    pub create_grace: Duration,
    /// Context to resume into; falls back to whatever playback remembers
    pub context_uri: Option<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &RecoveryConfig, context_uri: Option<String>) -> Self {
        Self {
            max_attempts: config.max_attempts,
            success_clear: config.success_clear(),
            error_clear: config.error_clear(),
            create_grace: config.create_grace(),
            context_uri,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default(), None)
    }
}

/// Persisted, observed state plus the id of the cycle that owns it
struct StateCell {
    state: Mutex<RecoveryState>,
    cycle: AtomicU64,
    store: Arc<dyn KeyValueStore>,
    observer: Arc<dyn StatusObserver>,
}

impl StateCell {
    fn current(&self) -> RecoveryState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, transition: Transition) -> RecoveryState {
        let next = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match state.apply(transition) {
                Ok(next) => {
                    *state = next.clone();
                    next
                }
                Err(e) => {
                    warn!("{}", e);
                    return state.clone();
                }
            }
        };
        store::save_json(self.store.as_ref(), RECOVERY_STATE_KEY, &next);
        self.observer
            .on_phase_change(next.phase, &next.message, next.progress);
        next
    }

    /// Return to idle after `delay` unless a newer cycle or a reset intervened
    fn schedule_clear(self: &Arc<Self>, cycle: u64, delay: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(cycle, "No runtime to clear finished recovery cycle");
            return;
        };
        let cell = Arc::clone(self);
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if cell.cycle.load(Ordering::Acquire) == cycle {
                debug!(cycle, "Clearing finished recovery cycle");
                cell.commit(Transition::Clear);
            }
        });
    }

    /// Drop everything, including the persisted record
    fn wipe(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = RecoveryState::default();
        self.store.remove(RECOVERY_STATE_KEY);
        self.observer.on_phase_change(RecoveryPhase::Idle, "", 0.0);
    }
}

/// Fails the cycle it was armed for unless disarmed first.
///
/// A caller may drop `recover()` at any await point; the cycle still ends
/// in `error` with a scheduled clear, a breaker failure and a counted
/// attempt, so the next `Begin` is accepted.
struct CycleGuard {
    cell: Arc<StateCell>,
    breaker: Arc<CircuitBreaker>,
    cycle: u64,
    error_clear: Duration,
    armed: bool,
}

impl CycleGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let message = "recovery cancelled before completion".to_string();
        self.breaker.record_failure();
        let failed = self.cell.commit(Transition::Fail(message.clone()));
        warn!(cycle = self.cycle, attempts = failed.attempts, "{}", message);
        self.cell.schedule_clear(self.cycle, self.error_clear);
    }
}

pub struct RecoveryOrchestrator {
    lifecycle: Arc<dyn PlayerLifecycle>,
    devices: Arc<dyn DeviceControl>,
    playback: Arc<dyn PlaybackResume>,
    breaker: Arc<CircuitBreaker>,
    reloader: Arc<dyn HardReloader>,
    settings: OrchestratorSettings,
    cell: Arc<StateCell>,
    recovering: AtomicBool,
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lifecycle: Arc<dyn PlayerLifecycle>,
        devices: Arc<dyn DeviceControl>,
        playback: Arc<dyn PlaybackResume>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<dyn KeyValueStore>,
        observer: Arc<dyn StatusObserver>,
        reloader: Arc<dyn HardReloader>,
        settings: OrchestratorSettings,
    ) -> Self {
        let loaded: Option<RecoveryState> = store::load_json(store.as_ref(), RECOVERY_STATE_KEY);
        let state = match loaded {
            Some(saved) => {
                let restored = saved.clone().restored();
                if restored != saved {
                    info!(
                        phase = %saved.phase,
                        attempts = restored.attempts,
                        "Recovered interrupted recovery state"
                    );
                    store::save_json(store.as_ref(), RECOVERY_STATE_KEY, &restored);
                }
                restored
            }
            None => RecoveryState::default(),
        };

        Self {
            lifecycle,
            devices,
            playback,
            breaker,
            reloader,
            settings,
            cell: Arc::new(StateCell {
                state: Mutex::new(state),
                cycle: AtomicU64::new(0),
                store,
                observer,
            }),
            recovering: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.cell.current()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Forget attempts, errors and breaker history. Refused mid-cycle.
    pub fn reset(&self) -> bool {
        if self.is_recovering() {
            return false;
        }
        // Invalidate any pending delayed clear
        self.cell.cycle.fetch_add(1, Ordering::AcqRel);
        self.breaker.reset();
        self.cell.commit(Transition::Reset);
        info!("Recovery state reset");
        true
    }

    fn enter(&self, phase: RecoveryPhase) {
        let state = self.cell.commit(Transition::Enter(phase));
        info!(phase = %state.phase, progress = state.progress, "{}", state.message);
    }

    fn exhaust(&self, attempts: u32) {
        let reason = RecoveryError::AttemptsExhausted { attempts };
        warn!(
            max = self.settings.max_attempts,
            "{}, requesting hard reload", reason
        );
        self.cell.cycle.fetch_add(1, Ordering::AcqRel);
        self.cell.wipe();
        self.breaker.reset();
        self.playback.forget();
        self.reloader.hard_reload(attempts);
    }

    async fn run_phases(&self) -> Result<ResumeStrategy> {
        // destroying (entered by Begin)
        self.lifecycle.destroy().await;

        self.enter(RecoveryPhase::ReloadingClient);
        self.lifecycle.reload_sdk().await?;

        self.enter(RecoveryPhase::CreatingPlayer);
        let limit = self.settings.create_grace + self.lifecycle.init_timeout();
        let created = tokio::time::timeout(limit, self.lifecycle.create_player())
            .await
            .map_err(|_| RecoveryError::ClientInitTimeout(limit))??;
        let device_id = self
            .lifecycle
            .device_id()
            .ok_or(RecoveryError::DeviceNotFound(created))?;
        if self.lifecycle.status() != PlayerStatus::Ready {
            return Err(RecoveryError::ClientInit("player not ready".into()));
        }

        self.enter(RecoveryPhase::RegisteringDevice);
        self.devices.wait_for_registration(&device_id).await?;
        self.devices.transfer_to_device(&device_id).await?;
        self.devices.wait_for_activation(&device_id).await?;

        self.enter(RecoveryPhase::RestoringPlayback);
        self.playback
            .resume_playback(&device_id, self.settings.context_uri.as_deref())
            .await
    }
}

#[async_trait]
impl RecoveryTrigger for RecoveryOrchestrator {
    async fn recover(&self) -> RecoveryOutcome {
        let Some(_recovering) = FlagGuard::try_acquire(&self.recovering) else {
            debug!("Recovery already in progress");
            return RecoveryOutcome::Skipped(SkipReason::AlreadyRunning);
        };

        let attempts = self.cell.current().attempts;
        if attempts >= self.settings.max_attempts {
            self.exhaust(attempts);
            return RecoveryOutcome::Exhausted;
        }

        if self.breaker.is_open() {
            info!("Circuit breaker open, skipping recovery");
            return RecoveryOutcome::Skipped(SkipReason::CircuitOpen);
        }

        let cycle = self.cell.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        let started = self.cell.commit(Transition::Begin);
        info!(attempt = started.attempts, "Starting playback recovery");
        let pending = CycleGuard {
            cell: Arc::clone(&self.cell),
            breaker: Arc::clone(&self.breaker),
            cycle,
            error_clear: self.settings.error_clear,
            armed: true,
        };

        let result = self.run_phases().await;
        pending.disarm();
        match result {
            Ok(strategy) => {
                self.breaker.record_success();
                self.cell.commit(Transition::Succeed(strategy));
                info!(?strategy, "Playback recovery succeeded");
                self.cell.schedule_clear(cycle, self.settings.success_clear);
                RecoveryOutcome::Succeeded(strategy)
            }
            Err(e) => {
                let message = e.to_string();
                self.breaker.record_failure();
                let failed = self.cell.commit(Transition::Fail(message.clone()));
                warn!(attempts = failed.attempts, "Playback recovery failed: {}", message);
                self.cell.schedule_clear(cycle, self.settings.error_clear);
                RecoveryOutcome::Failed(message)
            }
        }
    }

    fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }
}
