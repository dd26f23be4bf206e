//! Playback commands and resumption

pub mod manager;
pub mod queue;

pub use manager::{PlaybackManager, PlaybackResume, ResumePoint};
pub use queue::{PlaybackCommand, PlaybackService};
