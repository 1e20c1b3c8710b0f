#![forbid(unsafe_code)]

use thiserror::Error;
use zapline_core::ChannelId;

use crate::session::SessionState;

/// Playback engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("no channels available under the current filter")]
    EmptyDirectory,

    #[error("session is destroyed")]
    SessionDestroyed,

    #[error("invalid session transition: {operation} while {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("channel {channel} failed: {reason}")]
    ChannelFailed { channel: ChannelId, reason: String },

    #[error("engine is shut down")]
    ShutDown,
}

pub type EngineResult<T> = Result<T, EngineError>;
