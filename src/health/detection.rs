//! Stall and device-mismatch detection over consecutive snapshots

use crate::config::HealthConfig;
use crate::remote::PlaybackSnapshot;

/// Flags a track that claims to be playing but is not advancing.
///
/// Stalled means: same track as the previous sample, still playing, progress
/// advanced by at most `tolerance_ms`, and not inside the final
/// `near_end_ms` of the track (where the remote often pauses briefly while
/// switching tracks).
#[derive(Debug, Clone)]
pub struct StallDetector {
    tolerance_ms: u64,
    near_end_ms: u64,
    previous: Option<(String, u64)>,
}

impl StallDetector {
    pub fn new(tolerance_ms: u64, near_end_ms: u64) -> Self {
        Self {
            tolerance_ms,
            near_end_ms,
            previous: None,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.stall_tolerance_ms, config.near_end_window_ms)
    }

    /// Feed the next sample; returns true if playback is stalled
    pub fn observe(&mut self, snapshot: &PlaybackSnapshot) -> bool {
        let (Some(track), Some(progress)) = (&snapshot.track_uri, snapshot.progress_ms) else {
            self.previous = None;
            return false;
        };
        if !snapshot.is_playing {
            self.previous = None;
            return false;
        }

        let stalled = match &self.previous {
            Some((previous_track, previous_progress)) if previous_track == track => {
                let near_end = snapshot
                    .duration_ms
                    .is_some_and(|duration| duration.saturating_sub(progress) <= self.near_end_ms);
                progress >= *previous_progress
                    && progress - previous_progress <= self.tolerance_ms
                    && !near_end
            }
            _ => false,
        };

        self.previous = Some((track.clone(), progress));
        stalled
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Confirms a device mismatch only after `threshold` consecutive samples
#[derive(Debug, Clone)]
pub struct MismatchTracker {
    threshold: u32,
    consecutive: u32,
}

impl MismatchTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    /// Returns true once the mismatch is confirmed
    pub fn observe(&mut self, expected: &str, actual: Option<&str>) -> bool {
        if actual == Some(expected) {
            self.consecutive = 0;
            return false;
        }
        self.consecutive += 1;
        self.consecutive >= self.threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}
