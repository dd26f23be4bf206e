//! Error taxonomy for the recovery core
//!
//! Every phase of a recovery cycle reports failures as a `RecoveryError`.
//! The orchestrator converts them into the persisted `RecoveryState.error`
//! string at the phase boundary; only `AttemptsExhausted` escalates.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecoveryError {
    #[error("device {0} is not registered with the remote service")]
    DeviceNotFound(String),

    #[error("device {device_id} did not register within {waited:?}")]
    DeviceRegistrationTimeout { device_id: String, waited: Duration },

    #[error("device {device_id} did not become active within {waited:?}")]
    DeviceActivationTimeout { device_id: String, waited: Duration },

    #[error("playback resume failed: {0}")]
    PlaybackResumeFailed(String),

    #[error("playback stalled at {position_ms}ms")]
    PlaybackStalled { position_ms: u64 },

    #[error("remote reports device {actual:?}, expected {expected}")]
    DeviceMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("player client not ready after {0:?}")]
    ClientInitTimeout(Duration),

    /// SDK-reported initialization, authentication or account failure
    #[error("player client failed: {0}")]
    ClientInit(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("credentials unavailable: {0}")]
    Credentials(String),

    /// A lock guarding a device operation is already held
    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("recovery attempts exhausted after {attempts} cycles")]
    AttemptsExhausted { attempts: u32 },
}

impl From<reqwest::Error> for RecoveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
