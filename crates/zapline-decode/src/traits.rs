#![forbid(unsafe_code)]

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::sync::broadcast;
use url::Url;

use crate::{
    event::{DecoderEvent, ManifestInfo},
    signal::ErrorSignal,
};

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle to the playback surface a decoded stream is attached to.
///
/// The engine never renders; it only binds and unbinds decoders to this
/// handle.
#[derive(Clone, Debug)]
pub struct SinkHandle {
    id: u64,
    label: Arc<str>,
}

impl SinkHandle {
    pub fn new<S: AsRef<str>>(label: S) -> Self {
        Self {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label.as_ref()),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// One decoder instance, exclusively owned by one stream session.
///
/// `destroy()` is synchronous and idempotent: eviction and teardown paths
/// must be able to release the handle without awaiting, and a second call
/// is a no-op.
#[cfg_attr(
    any(test, feature = "test-utils"),
    unimock::unimock(api = DecoderMock)
)]
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Fetch and parse the manifest at `url`.
    async fn load_manifest(&self, url: Url) -> Result<ManifestInfo, ErrorSignal>;

    /// Bind decoder output to a playback sink.
    fn attach_sink(&self, sink: SinkHandle);

    /// Unbind from the sink, keeping the decoder alive.
    fn detach_sink(&self);

    /// One-shot decoder-level recovery from media corruption.
    async fn recover_media(&self) -> Result<(), ErrorSignal>;

    /// Subscribe to this decoder's event stream.
    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent>;

    /// Release the decoder and everything it owns.
    fn destroy(&self);
}

/// Creates one decoder per stream session.
#[cfg_attr(
    any(test, feature = "test-utils"),
    unimock::unimock(api = DecoderFactoryMock)
)]
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Arc<dyn Decoder>;
}
