//! Non-blocking admission flags

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds an `AtomicBool` set for as long as the guard lives.
///
/// Acquisition is a single compare-exchange, so callers can take the flag
/// before their first `.await` and losers return immediately.
pub(crate) struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
