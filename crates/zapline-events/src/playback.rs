#![forbid(unsafe_code)]

use zapline_core::ChannelId;

/// Playback state changes exposed to the UI layer.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PlaybackEvent {
    /// A session for `channel` started loading its manifest.
    Loading { channel: ChannelId },
    /// The active session is decoding fragments.
    Playing { channel: ChannelId },
    /// The active session stopped producing data.
    Stalled { channel: ChannelId, reason: String },
    /// A recovery attempt is in flight.
    Recovering { channel: ChannelId, attempt: u32, of: u32 },
    /// The channel failed terminally; no further recovery will run.
    Failed { channel: ChannelId, reason: String },
    /// The decoder switched quality levels.
    QualityChanged { channel: ChannelId, label: String },
}

/// Preload cache activity, published for observability.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CacheEvent {
    /// A neighbor's manifest was parsed ahead of selection.
    Warmed { channel: ChannelId },
    /// A cached session was destroyed to make room.
    Evicted { channel: ChannelId },
    /// A warmed session was handed to the coordinator.
    Promoted { channel: ChannelId },
}
