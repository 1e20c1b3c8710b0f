#![forbid(unsafe_code)]

use crate::playback::{CacheEvent, PlaybackEvent};

/// Unified event for the playback engine.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    /// Playback state change on the active session.
    Playback(PlaybackEvent),
    /// Preload cache activity.
    Cache(CacheEvent),
}

impl From<PlaybackEvent> for Event {
    fn from(e: PlaybackEvent) -> Self {
        Self::Playback(e)
    }
}

impl From<CacheEvent> for Event {
    fn from(e: CacheEvent) -> Self {
        Self::Cache(e)
    }
}
