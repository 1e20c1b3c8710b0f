#![forbid(unsafe_code)]

//! Boundary to the external adaptive-streaming decoding library.
//!
//! The engine never talks to a concrete decoder; it goes through the
//! [`Decoder`] trait. A real integration implements the trait over the
//! vendor library; tests use the scriptable [`testing::FakeDecoder`].

pub mod event;
pub mod signal;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use event::{DecoderEvent, ManifestInfo};
pub use signal::{ErrorDomain, ErrorSignal};
pub use traits::{Decoder, DecoderFactory, SinkHandle};

#[cfg(any(test, feature = "test-utils"))]
pub use traits::{DecoderFactoryMock, DecoderMock};
