//! Failure-counting gate with a cool-down window
//!
//! Open/closed is never stored: it is recomputed from the failure count and
//! the age of the last failure on every `is_open` call. Once the cool-down
//! has elapsed that call also zeroes the counters, so stale failures never
//! linger and no background timer is needed.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircuitBreakerState {
    pub consecutive_failures: u32,
    /// Milliseconds since the last recorded failure
    pub last_failure_ago_ms: Option<u64>,
    pub is_open: bool,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    counters: Mutex<Counters>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    pub fn is_open(&self) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(last_failure) = counters.last_failure else {
            return false;
        };
        if last_failure.elapsed() >= self.cooldown {
            *counters = Counters::default();
            return false;
        }
        counters.consecutive_failures >= self.threshold
    }

    pub fn record_failure(&self) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.consecutive_failures += 1;
        counters.last_failure = Some(Instant::now());
        tracing::debug!(
            failures = counters.consecutive_failures,
            threshold = self.threshold,
            "Circuit breaker recorded failure"
        );
    }

    pub fn record_success(&self) {
        self.reset();
    }

    pub fn reset(&self) {
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner) = Counters::default();
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let is_open = self.is_open();
        let counters = *self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        CircuitBreakerState {
            consecutive_failures: counters.consecutive_failures,
            last_failure_ago_ms: counters
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
            is_open,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::from_config(&BreakerConfig::default())
    }
}
