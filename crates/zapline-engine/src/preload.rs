#![forbid(unsafe_code)]

//! Bounded preload cache of warmed sessions for neighboring channels.
//!
//! Insertion-ordered with capacity-driven eviction: the oldest
//! non-protected entry is destroyed *before* its removal becomes visible.
//! The active session's key is never eligible for eviction. Warming runs as
//! independent async work and deduplicates in-flight loads, so a warm
//! followed by a promotion costs exactly one manifest load.

use std::{
    collections::HashSet,
    sync::Arc,
    time::Instant,
};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use zapline_core::{ChannelDescriptor, ChannelId};
use zapline_decode::DecoderFactory;
use zapline_events::{CacheEvent, EventBus};

use crate::session::StreamSession;

/// Cache key: a channel pinned to one concrete stream URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub channel: ChannelId,
    pub url: String,
}

impl CacheKey {
    pub fn new<U: Into<String>>(channel: ChannelId, url: U) -> Self {
        Self {
            channel,
            url: url.into(),
        }
    }

    /// Key under which `select_channel` looks a channel up: its primary URL.
    #[must_use]
    pub fn for_channel(channel: &ChannelDescriptor) -> Self {
        Self::new(channel.id.clone(), channel.primary_stream_url.clone())
    }
}

/// Read-only probe result; does not affect ordering.
#[derive(Clone, Copy, Debug)]
pub struct CacheProbe {
    pub warmed: bool,
    pub inserted_at: Instant,
}

struct CacheEntry {
    key: CacheKey,
    session: StreamSession,
    inserted_at: Instant,
    warmed: bool,
}

#[derive(Default)]
struct CacheState {
    /// Insertion order: index 0 is the oldest entry.
    entries: Vec<CacheEntry>,
    protected: Option<CacheKey>,
    warming: HashSet<CacheKey>,
    closed: bool,
}

/// Bounded key→session map with oldest-first eviction.
///
/// Cloneable handle; all clones share one state. Sessions are owned by the
/// cache while cached and handed over on [`promote`](Self::promote).
#[derive(Clone)]
pub struct PreloadCache {
    capacity: usize,
    state: Arc<Mutex<CacheState>>,
    events: EventBus,
    cancel: CancellationToken,
}

impl PreloadCache {
    #[must_use]
    pub fn new(capacity: usize, events: EventBus, cancel: CancellationToken) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Arc::new(Mutex::new(CacheState::default())),
            events,
            cancel,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Read-only probe; by itself does not affect recency ordering.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheProbe> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| &e.key == key)
            .map(|e| CacheProbe {
                warmed: e.warmed,
                inserted_at: e.inserted_at,
            })
    }

    /// Mark the key that must never be evicted (the active session's key),
    /// or clear the protection.
    pub fn set_protected(&self, key: Option<CacheKey>) {
        self.state.lock().protected = key;
    }

    /// Insert a session, evicting the oldest non-protected entry when at
    /// capacity. The evicted session is destroyed before its entry is
    /// removed.
    pub fn put(&self, key: CacheKey, session: StreamSession, warmed: bool) {
        let mut state = self.state.lock();
        self.put_locked(&mut state, key, session, warmed);
    }

    fn put_locked(
        &self,
        state: &mut CacheState,
        key: CacheKey,
        mut session: StreamSession,
        warmed: bool,
    ) {
        if state.closed {
            session.destroy();
            return;
        }

        // Replacing an existing entry for the same key destroys the old
        // session first; two components must never both own one key.
        if let Some(pos) = state.entries.iter().position(|e| e.key == key) {
            let mut old = state.entries.remove(pos);
            old.session.destroy();
        }

        if state.entries.len() >= self.capacity {
            let victim = state
                .entries
                .iter()
                .position(|e| state.protected.as_ref() != Some(&e.key));
            match victim {
                Some(pos) => {
                    let entry = &mut state.entries[pos];
                    debug!(channel = %entry.key.channel, "evicting preloaded session");
                    entry.session.destroy();
                    let entry = state.entries.remove(pos);
                    self.events.publish(CacheEvent::Evicted {
                        channel: entry.key.channel,
                    });
                }
                None => {
                    // Capacity 1 and the only entry is protected: the
                    // incoming session has no slot.
                    warn!(channel = %key.channel, "no evictable cache slot, dropping incoming session");
                    session.destroy();
                    return;
                }
            }
        }

        trace!(channel = %key.channel, warmed, size = state.entries.len() + 1, "cached session");
        state.entries.push(CacheEntry {
            key,
            session,
            inserted_at: Instant::now(),
            warmed,
        });
    }

    /// Remove the entry and transfer ownership of its session to the
    /// caller. After this call the cache no longer tracks that session.
    #[must_use]
    pub fn promote(&self, key: &CacheKey) -> Option<StreamSession> {
        let mut state = self.state.lock();
        let pos = state.entries.iter().position(|e| &e.key == key)?;
        let entry = state.entries.remove(pos);
        drop(state);
        debug!(channel = %entry.key.channel, "promoted preloaded session");
        self.events.publish(CacheEvent::Promoted {
            channel: entry.key.channel,
        });
        Some(entry.session)
    }

    /// Create a cold session for `channel`, load its manifest with attach
    /// deferred, and cache it as warmed.
    ///
    /// A failed warm destroys the session and leaves no trace. Results
    /// arriving after shutdown or cancellation are discarded. In-flight
    /// warms deduplicate: a concurrent warm for the same key is a no-op.
    pub async fn warm(&self, factory: Arc<dyn DecoderFactory>, channel: ChannelDescriptor) {
        let key = CacheKey::for_channel(&channel);
        {
            let mut state = self.state.lock();
            if state.closed
                || state.entries.iter().any(|e| e.key == key)
                || !state.warming.insert(key.clone())
            {
                return;
            }
        }

        let mut session = StreamSession::create(channel, factory.as_ref());
        let loaded = session.load().await;

        let mut state = self.state.lock();
        state.warming.remove(&key);
        match loaded {
            Ok(_) if !state.closed && !self.cancel.is_cancelled() => {
                let channel_id = key.channel.clone();
                self.put_locked(&mut state, key, session, true);
                drop(state);
                self.events.publish(CacheEvent::Warmed {
                    channel: channel_id,
                });
            }
            Ok(_) => {
                trace!(channel = %key.channel, "discarding warm result after shutdown");
                session.destroy();
            }
            Err(signal) => {
                debug!(channel = %key.channel, error = %signal, "warm failed, leaving no trace");
                session.destroy();
            }
        }
    }

    /// Destroy every contained session. Used on coordinator shutdown.
    pub fn evict_all(&self) {
        let mut state = self.state.lock();
        for entry in &mut state.entries {
            entry.session.destroy();
        }
        state.entries.clear();
        state.warming.clear();
    }

    /// Stop accepting insertions; late warm results are destroyed.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }
}
