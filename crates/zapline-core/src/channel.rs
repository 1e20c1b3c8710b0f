#![forbid(unsafe_code)]

use std::fmt;

/// Identifier of a channel in the directory.
///
/// Opaque to the engine; whatever the directory collaborator hands us is
/// carried through unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One entry of the channel directory, as handed to the engine.
///
/// Read-only input. Stream URLs are kept as raw strings: they come from an
/// external collaborator and are only validated when a session actually
/// loads them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    pub display_name: String,
    pub primary_stream_url: String,
    /// Tried in order after the primary; never reordered.
    pub backup_stream_urls: Vec<String>,
    pub category: String,
}

impl ChannelDescriptor {
    pub fn new<I, N, U>(id: I, display_name: N, primary_stream_url: U) -> Self
    where
        I: Into<ChannelId>,
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            primary_stream_url: primary_stream_url.into(),
            backup_stream_urls: Vec::new(),
            category: String::new(),
        }
    }

    pub fn with_backup_urls<U: Into<String>>(mut self, urls: Vec<U>) -> Self {
        self.backup_stream_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category<C: Into<String>>(mut self, category: C) -> Self {
        self.category = category.into();
        self
    }

    /// Total number of addressable stream URLs (primary + backups).
    #[must_use]
    pub fn stream_url_count(&self) -> usize {
        1 + self.backup_stream_urls.len()
    }

    /// Stream URL at `index`, where index 0 is the primary and the backups
    /// follow in their declared order.
    #[must_use]
    pub fn stream_url_at(&self, index: usize) -> Option<&str> {
        if index == 0 {
            Some(&self.primary_stream_url)
        } else {
            self.backup_stream_urls
                .get(index - 1)
                .map(String::as_str)
        }
    }
}
