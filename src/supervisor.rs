//! Process-level escalation
//!
//! The jukebox cannot reload itself in place. A hard reload stops the
//! service gracefully and exits with `RESTART_EXIT_CODE`; the service manager
//! (systemd `Restart=on-failure`, a container restart policy) starts a fresh
//! process with clean runtime state.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::{BusEvent, SharedBus};
use crate::recovery::HardReloader;

/// EX_TEMPFAIL: "try again later"
pub const RESTART_EXIT_CODE: u8 = 75;

pub struct RestartSignal {
    shutdown: CancellationToken,
    bus: SharedBus,
    requested: AtomicBool,
}

impl RestartSignal {
    pub fn new(shutdown: CancellationToken, bus: SharedBus) -> Self {
        Self {
            shutdown,
            bus,
            requested: AtomicBool::new(false),
        }
    }

    pub fn restart_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

impl HardReloader for RestartSignal {
    fn hard_reload(&self, attempts: u32) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(attempts, "Hard reload requested, shutting down for restart");
        self.bus.publish(BusEvent::HardReloadRequested { attempts });
        self.shutdown.cancel();
    }
}
