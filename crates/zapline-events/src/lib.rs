#![forbid(unsafe_code)]

//! Unified event surface for the zapline playback engine.
//!
//! All engine components publish onto one [`EventBus`]; the UI layer holds a
//! single subscription and sees playback and cache activity interleaved in
//! publish order.

pub mod bus;
pub mod event;
pub mod playback;

pub use bus::EventBus;
pub use event::Event;
pub use playback::{CacheEvent, PlaybackEvent};
