//! Playback recovery: breaker, state machine and the orchestrator that runs it

pub mod breaker;
pub mod orchestrator;
pub mod state;

pub use breaker::{CircuitBreaker, CircuitBreakerState};
pub use orchestrator::{
    HardReloader, OrchestratorSettings, RecoveryOrchestrator, RecoveryOutcome, RecoveryTrigger,
    SkipReason,
};
pub use state::{InvalidTransition, RecoveryPhase, RecoveryState, ResumeStrategy, Transition};
