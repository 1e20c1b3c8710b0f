#![forbid(unsafe_code)]

//! Channel identity and directory primitives shared across the zapline
//! workspace.

pub mod channel;
pub mod directory;

pub use channel::{ChannelDescriptor, ChannelId};
pub use directory::ChannelDirectory;
