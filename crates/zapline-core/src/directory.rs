#![forbid(unsafe_code)]

use crate::channel::{ChannelDescriptor, ChannelId};

/// Ordered channel directory with an optional category filter.
///
/// The engine treats the directory as read-only input and re-derives its
/// neighbor computation from the *filtered* ordering whenever the list or
/// the filter changes. Adjacency wraps around: past the end goes to index 0,
/// before index 0 goes to the last entry.
#[derive(Clone, Debug, Default)]
pub struct ChannelDirectory {
    channels: Vec<ChannelDescriptor>,
    filter: Option<String>,
}

/// Previous/next channels of an entry in the filtered ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbors {
    pub previous: ChannelDescriptor,
    pub next: ChannelDescriptor,
}

impl ChannelDirectory {
    #[must_use]
    pub fn new(channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            channels,
            filter: None,
        }
    }

    /// Replace the full channel list, keeping the current filter.
    pub fn set_channels(&mut self, channels: Vec<ChannelDescriptor>) {
        self.channels = channels;
    }

    /// Restrict the ordering to one category, or clear the restriction.
    pub fn set_filter(&mut self, category: Option<String>) {
        self.filter = category;
    }

    #[must_use]
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// The channels visible under the current filter, in directory order.
    pub fn filtered(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels
            .iter()
            .filter(move |c| self.filter.as_deref().is_none_or(|f| c.category == f))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filtered().next().is_none()
    }

    /// Look up a channel by id, ignoring the filter.
    #[must_use]
    pub fn get(&self, id: &ChannelId) -> Option<&ChannelDescriptor> {
        self.channels.iter().find(|c| &c.id == id)
    }

    /// First channel of the filtered ordering.
    #[must_use]
    pub fn first(&self) -> Option<&ChannelDescriptor> {
        self.filtered().next()
    }

    fn filtered_vec(&self) -> Vec<&ChannelDescriptor> {
        self.filtered().collect()
    }

    fn position(&self, id: &ChannelId) -> Option<usize> {
        self.filtered().position(|c| &c.id == id)
    }

    /// Channel after `id` in the filtered ordering, wrapping to the front.
    ///
    /// An id that is not part of the filtered ordering (filtered out, or
    /// unknown) anchors to the first entry.
    #[must_use]
    pub fn next_after(&self, id: &ChannelId) -> Option<ChannelDescriptor> {
        let list = self.filtered_vec();
        if list.is_empty() {
            return None;
        }
        let next = match self.position(id) {
            Some(pos) => list[(pos + 1) % list.len()],
            None => list[0],
        };
        Some(next.clone())
    }

    /// Channel before `id` in the filtered ordering, wrapping to the back.
    #[must_use]
    pub fn prev_before(&self, id: &ChannelId) -> Option<ChannelDescriptor> {
        let list = self.filtered_vec();
        if list.is_empty() {
            return None;
        }
        let prev = match self.position(id) {
            Some(pos) => list[(pos + list.len() - 1) % list.len()],
            None => list[0],
        };
        Some(prev.clone())
    }

    /// Both neighbors of `id` in the filtered ordering.
    ///
    /// Returns `None` when `id` is not part of the filtered ordering or the
    /// ordering has no other entries. With exactly two entries the single
    /// other channel is both previous and next.
    #[must_use]
    pub fn neighbors(&self, id: &ChannelId) -> Option<Neighbors> {
        let list = self.filtered_vec();
        let pos = self.position(id)?;
        if list.len() < 2 {
            return None;
        }
        Some(Neighbors {
            previous: list[(pos + list.len() - 1) % list.len()].clone(),
            next: list[(pos + 1) % list.len()].clone(),
        })
    }
}
