#![forbid(unsafe_code)]

//! Error taxonomy and the classifier mapping raw decoder signals onto it.
//!
//! Only this module inspects `ErrorSignal::detail`; every other component
//! reacts to the classified value. The transient/persistent network split
//! controls retry cost: transient errors are retried immediately for free,
//! persistent ones pay backoff.

use zapline_decode::{ErrorDomain, ErrorSignal};

/// Classified decoder error, driving all recovery decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Short-lived network hiccup; retry immediately.
    TransientNetwork,
    /// Network failure expected to persist; retry with backoff.
    PersistentNetwork,
    /// Decoder buffer/parse damage; one decoder-level recovery, then
    /// teardown.
    MediaCorruption,
    /// The manifest cannot be fetched from the current URL.
    ManifestUnreachable,
    /// Fragments referenced by the manifest cannot be fetched.
    FragmentUnavailable,
    /// The stream cannot be played at all; retrying cannot help.
    Unsupported,
}

impl ErrorClass {
    /// Short human-readable label for UI-facing stall/failure reasons.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient network error",
            Self::PersistentNetwork => "persistent network error",
            Self::MediaCorruption => "media corruption",
            Self::ManifestUnreachable => "manifest unreachable",
            Self::FragmentUnavailable => "fragment unavailable",
            Self::Unsupported => "unsupported stream",
        }
    }
}

/// Substrings marking a fatal network error as short-lived.
///
/// Connection teardown mid-transfer (aborts, resets) recovers on the next
/// request; refusals and resolution failures do not.
const TRANSIENT_NETWORK_PATTERNS: &[&str] = &["aborted", "reset", "interrupted"];

const UNSUPPORTED_PATTERNS: &[&str] = &["unsupported", "codec", "incompatible", "demux"];

/// Map a raw decoder error signal to its taxonomy value.
///
/// Pure and deterministic: identical signals always classify identically.
#[must_use]
pub fn classify(signal: &ErrorSignal) -> ErrorClass {
    let detail = signal.detail.to_ascii_lowercase();

    match signal.domain {
        ErrorDomain::Network => {
            if !signal.fatal {
                return ErrorClass::TransientNetwork;
            }
            if TRANSIENT_NETWORK_PATTERNS.iter().any(|p| detail.contains(p)) {
                ErrorClass::TransientNetwork
            } else {
                ErrorClass::PersistentNetwork
            }
        }
        ErrorDomain::Media => {
            if UNSUPPORTED_PATTERNS.iter().any(|p| detail.contains(p)) {
                ErrorClass::Unsupported
            } else {
                ErrorClass::MediaCorruption
            }
        }
        ErrorDomain::Manifest => {
            if detail.contains("unsupported") {
                ErrorClass::Unsupported
            } else {
                ErrorClass::ManifestUnreachable
            }
        }
        ErrorDomain::Fragment => ErrorClass::FragmentUnavailable,
    }
}
