#![forbid(unsafe_code)]

use std::fmt;

use thiserror::Error;

/// Subsystem of the decoding library that raised an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Network,
    Media,
    Manifest,
    Fragment,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Media => "media",
            Self::Manifest => "manifest",
            Self::Fragment => "fragment",
        };
        f.write_str(s)
    }
}

/// Raw error signal from the decoding library.
///
/// Only the classifier inspects `detail`; every other component reacts to
/// the classified taxonomy value instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{domain} error (fatal: {fatal}): {detail}")]
pub struct ErrorSignal {
    pub domain: ErrorDomain,
    pub fatal: bool,
    pub detail: String,
}

impl ErrorSignal {
    pub fn new<S: Into<String>>(domain: ErrorDomain, fatal: bool, detail: S) -> Self {
        Self {
            domain,
            fatal,
            detail: detail.into(),
        }
    }

    pub fn network<S: Into<String>>(fatal: bool, detail: S) -> Self {
        Self::new(ErrorDomain::Network, fatal, detail)
    }

    pub fn media<S: Into<String>>(fatal: bool, detail: S) -> Self {
        Self::new(ErrorDomain::Media, fatal, detail)
    }

    pub fn manifest<S: Into<String>>(fatal: bool, detail: S) -> Self {
        Self::new(ErrorDomain::Manifest, fatal, detail)
    }

    pub fn fragment<S: Into<String>>(fatal: bool, detail: S) -> Self {
        Self::new(ErrorDomain::Fragment, fatal, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_domain_and_detail() {
        let signal = ErrorSignal::network(true, "connection refused");
        assert_eq!(
            signal.to_string(),
            "network error (fatal: true): connection refused"
        );
    }
}
