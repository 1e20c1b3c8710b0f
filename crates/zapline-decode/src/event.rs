#![forbid(unsafe_code)]

use crate::signal::ErrorSignal;

/// Manifest metadata reported by the decoder after a successful parse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestInfo {
    /// Human-readable quality level labels, lowest first.
    pub quality_labels: Vec<String>,
}

impl ManifestInfo {
    pub fn new<L: Into<String>>(quality_labels: Vec<L>) -> Self {
        Self {
            quality_labels: quality_labels.into_iter().map(Into::into).collect(),
        }
    }
}

/// Events emitted by one decoder instance.
///
/// One typed subscription per session replaces per-event callback wiring;
/// dropping the receiver is the whole cleanup.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DecoderEvent {
    /// The manifest was fetched and parsed.
    ManifestParsed { info: ManifestInfo },
    /// One fragment was fetched and decoded.
    FragmentLoaded { bytes: u64 },
    /// A fragment failed to load or decode.
    FragmentError { signal: ErrorSignal },
    /// Playback ran out of buffered data.
    BufferStalled,
    /// The decoder hit an error it will not recover from on its own.
    FatalError { signal: ErrorSignal },
    /// The decoder switched to a different quality level.
    QualitySwitched { label: String },
}
