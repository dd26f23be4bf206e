//! Jukebox Recovery - self-healing playback for an always-on jukebox
//!
//! Keeps a streaming-service playback client alive without a human nearby.
//!
//! This library provides:
//! - Lifecycle ownership of the playback client (load, create, destroy)
//! - Device registration and activation checks against the remote API
//! - A serialized playback command queue and resume strategies
//! - A recovery state machine with circuit breaker and persisted progress
//! - Adaptive health monitoring with stall and device-mismatch detection
//! - Server-Sent Events and a small HTTP API for status and control

pub mod api;
pub mod bus;
pub mod config;
pub mod credentials;
pub mod device;
pub mod error;
mod guard;
pub mod health;
pub mod playback;
pub mod player;
pub mod recovery;
pub mod remote;
pub mod store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RecoveryError, Result};
