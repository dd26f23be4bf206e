//! Recovery state and its pure transition function
//!
//! Nothing here performs I/O. The orchestrator wraps `RecoveryState::apply`
//! with persistence and observer notification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered phases of a recovery cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    #[default]
    Idle,
    Destroying,
    ReloadingClient,
    CreatingPlayer,
    RegisteringDevice,
    RestoringPlayback,
    Success,
    Error,
}

impl RecoveryPhase {
    /// The phase that must follow this one on the happy path
    pub fn next(self) -> Option<RecoveryPhase> {
        match self {
            Self::Idle => Some(Self::Destroying),
            Self::Destroying => Some(Self::ReloadingClient),
            Self::ReloadingClient => Some(Self::CreatingPlayer),
            Self::CreatingPlayer => Some(Self::RegisteringDevice),
            Self::RegisteringDevice => Some(Self::RestoringPlayback),
            Self::RestoringPlayback => Some(Self::Success),
            Self::Success | Self::Error => None,
        }
    }

    /// Phases that execute work (between idle and a terminal phase)
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Success | Self::Error)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn progress(self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::Destroying => 0.15,
            Self::ReloadingClient => 0.40,
            Self::CreatingPlayer => 0.60,
            Self::RegisteringDevice => 0.80,
            Self::RestoringPlayback => 0.90,
            Self::Success => 1.0,
            Self::Error => 0.0,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Destroying => "Tearing down playback client",
            Self::ReloadingClient => "Reloading player runtime",
            Self::CreatingPlayer => "Creating playback client",
            Self::RegisteringDevice => "Registering device",
            Self::RestoringPlayback => "Restoring playback",
            Self::Success => "Playback restored",
            Self::Error => "Recovery failed",
        }
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Destroying => "destroying",
            Self::ReloadingClient => "reloading_client",
            Self::CreatingPlayer => "creating_player",
            Self::RegisteringDevice => "registering_device",
            Self::RestoringPlayback => "restoring_playback",
            Self::Success => "success",
            Self::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Which resume strategy brought playback back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStrategy {
    CurrentState,
    LastKnown,
    FreshStart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub phase: RecoveryPhase,
    pub attempts: u32,
    pub error: Option<String>,
    pub progress: f32,
    pub message: String,
    pub resume_strategy: Option<ResumeStrategy>,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Start a new cycle (enters `destroying`)
    Begin,
    /// Advance to the given phase; must be the immediate successor
    Enter(RecoveryPhase),
    Succeed(ResumeStrategy),
    Fail(String),
    /// Return a finished cycle to idle, keeping the attempt count
    Clear,
    /// Forget everything, including attempts
    Reset,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid transition {transition:?} from {from}")]
pub struct InvalidTransition {
    pub from: RecoveryPhase,
    pub transition: Transition,
}

impl RecoveryState {
    pub fn apply(&self, transition: Transition) -> Result<RecoveryState, InvalidTransition> {
        let invalid = |t: Transition| InvalidTransition {
            from: self.phase,
            transition: t,
        };

        match transition {
            Transition::Begin => {
                if self.phase.is_active() {
                    return Err(invalid(Transition::Begin));
                }
                Ok(RecoveryState {
                    phase: RecoveryPhase::Destroying,
                    attempts: self.attempts + 1,
                    error: None,
                    progress: RecoveryPhase::Destroying.progress(),
                    message: RecoveryPhase::Destroying.message().to_string(),
                    resume_strategy: None,
                })
            }
            Transition::Enter(phase) => {
                let allowed = self.phase.is_active()
                    && self.phase.next() == Some(phase)
                    && phase.is_active();
                if !allowed {
                    return Err(invalid(Transition::Enter(phase)));
                }
                Ok(RecoveryState {
                    phase,
                    progress: self.progress.max(phase.progress()),
                    message: phase.message().to_string(),
                    ..self.clone()
                })
            }
            Transition::Succeed(strategy) => {
                if self.phase != RecoveryPhase::RestoringPlayback {
                    return Err(invalid(Transition::Succeed(strategy)));
                }
                Ok(RecoveryState {
                    phase: RecoveryPhase::Success,
                    attempts: 0,
                    error: None,
                    progress: RecoveryPhase::Success.progress(),
                    message: RecoveryPhase::Success.message().to_string(),
                    resume_strategy: Some(strategy),
                })
            }
            Transition::Fail(error) => {
                if !self.phase.is_active() {
                    return Err(invalid(Transition::Fail(error)));
                }
                Ok(RecoveryState {
                    phase: RecoveryPhase::Error,
                    message: format!("{}: {}", RecoveryPhase::Error.message(), error),
                    error: Some(error),
                    ..self.clone()
                })
            }
            Transition::Clear => {
                if !self.phase.is_terminal() {
                    return Err(invalid(Transition::Clear));
                }
                Ok(RecoveryState {
                    attempts: self.attempts,
                    ..RecoveryState::default()
                })
            }
            Transition::Reset => Ok(RecoveryState::default()),
        }
    }

    /// Normalise a record loaded after a restart.
    ///
    /// A cycle that was mid-flight when the process died cannot be resumed;
    /// it counts as a failed attempt and the machine restarts from idle.
    pub fn restored(self) -> RecoveryState {
        if self.phase.is_active() {
            return RecoveryState {
                attempts: self.attempts,
                error: Some(format!("interrupted during {}", self.phase)),
                ..RecoveryState::default()
            };
        }
        if self.phase.is_terminal() {
            return RecoveryState {
                attempts: self.attempts,
                ..RecoveryState::default()
            };
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_to(phase: RecoveryPhase) -> RecoveryState {
        let mut state = RecoveryState::default().apply(Transition::Begin).unwrap();
        while state.phase != phase {
            let next = state.phase.next().unwrap();
            state = state.apply(Transition::Enter(next)).unwrap();
        }
        state
    }

    #[test]
    fn test_happy_path_order_and_progress() {
        let mut state = RecoveryState::default().apply(Transition::Begin).unwrap();
        let mut seen = vec![state.phase];
        let mut last_progress = state.progress;

        while let Some(next) = state.phase.next().filter(|p| p.is_active()) {
            state = state.apply(Transition::Enter(next)).unwrap();
            assert!(state.progress >= last_progress);
            last_progress = state.progress;
            seen.push(state.phase);
        }
        state = state
            .apply(Transition::Succeed(ResumeStrategy::FreshStart))
            .unwrap();
        seen.push(state.phase);

        assert_eq!(
            seen,
            vec![
                RecoveryPhase::Destroying,
                RecoveryPhase::ReloadingClient,
                RecoveryPhase::CreatingPlayer,
                RecoveryPhase::RegisteringDevice,
                RecoveryPhase::RestoringPlayback,
                RecoveryPhase::Success,
            ]
        );
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.attempts, 0);
        assert_eq!(state.resume_strategy, Some(ResumeStrategy::FreshStart));
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let state = walk_to(RecoveryPhase::Destroying);
        assert!(state
            .apply(Transition::Enter(RecoveryPhase::CreatingPlayer))
            .is_err());
        assert!(state
            .apply(Transition::Succeed(ResumeStrategy::CurrentState))
            .is_err());
        assert!(RecoveryState::default()
            .apply(Transition::Enter(RecoveryPhase::Destroying))
            .is_err());
    }

    #[test]
    fn test_failure_keeps_progress_and_attempts() {
        let state = walk_to(RecoveryPhase::CreatingPlayer);
        let failed = state.apply(Transition::Fail("no device".into())).unwrap();

        assert_eq!(failed.phase, RecoveryPhase::Error);
        assert_eq!(failed.error.as_deref(), Some("no device"));
        assert_eq!(failed.progress, state.progress);
        assert_eq!(failed.attempts, 1);

        let cleared = failed.apply(Transition::Clear).unwrap();
        assert_eq!(cleared.phase, RecoveryPhase::Idle);
        assert_eq!(cleared.error, None);
        assert_eq!(cleared.attempts, 1);
    }

    #[test]
    fn test_next_cycle_restarts_progress_and_counts_attempts() {
        let failed = walk_to(RecoveryPhase::RestoringPlayback)
            .apply(Transition::Fail("boom".into()))
            .unwrap();
        assert!(failed.progress > 0.8);

        let second = failed.apply(Transition::Begin).unwrap();
        assert_eq!(second.progress, RecoveryPhase::Destroying.progress());
        assert_eq!(second.attempts, 2);
        assert_eq!(second.error, None);
    }

    #[test]
    fn test_begin_rejected_while_active() {
        let state = walk_to(RecoveryPhase::RegisteringDevice);
        assert!(state.apply(Transition::Begin).is_err());
    }

    #[test]
    fn test_restored_mid_cycle_record_keeps_attempts() {
        let interrupted = RecoveryState {
            attempts: 2,
            ..walk_to(RecoveryPhase::CreatingPlayer)
        };
        let restored = interrupted.restored();

        assert_eq!(restored.phase, RecoveryPhase::Idle);
        assert_eq!(restored.attempts, 2);
        assert_eq!(
            restored.error.as_deref(),
            Some("interrupted during creating_player")
        );
    }

    #[test]
    fn test_serialized_phase_names() {
        let json = serde_json::to_string(&RecoveryPhase::ReloadingClient).unwrap();
        assert_eq!(json, "\"reloading_client\"");
        let json = serde_json::to_string(&ResumeStrategy::LastKnown).unwrap();
        assert_eq!(json, "\"last_known\"");
    }
}
