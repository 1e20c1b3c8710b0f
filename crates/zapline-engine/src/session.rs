#![forbid(unsafe_code)]

//! One adaptive-streaming session bound (or not yet bound) to a channel's
//! stream URL.
//!
//! A session exclusively owns its decoder instance. Ownership of the whole
//! session moves between the preload cache and the coordinator; the decoder
//! handle never outlives `destroy()`.

use std::{sync::Arc, time::Instant};

use tracing::{debug, trace};
use url::Url;
use zapline_core::{ChannelDescriptor, ChannelId};
use zapline_decode::{Decoder, DecoderFactory, ErrorSignal, ManifestInfo, SinkHandle};

use crate::error::{EngineError, EngineResult};

/// Lifecycle state of a stream session.
///
/// `Cold → Loading → Attached → Playing ⇄ Stalled → {Playing | Failed}`;
/// `Destroyed` is reachable from every state and terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Cold,
    Loading,
    Attached,
    Playing,
    Stalled,
    Failed,
    Destroyed,
}

pub struct StreamSession {
    channel: ChannelDescriptor,
    decoder: Arc<dyn Decoder>,
    state: SessionState,
    created_at: Instant,
    last_progress_at: Instant,
    /// Position into the primary+backup URL sequence.
    active_url_index: usize,
    fragment_error_count: u32,
    manifest_error_count: u32,
    manifest_parsed: bool,
    media_recovery_spent: bool,
    quality_labels: Vec<String>,
    sink: Option<SinkHandle>,
}

impl StreamSession {
    /// Create a `Cold` session against the channel's primary URL.
    ///
    /// No resource allocation beyond the decoder handle placeholder.
    #[must_use]
    pub fn create(channel: ChannelDescriptor, factory: &dyn DecoderFactory) -> Self {
        Self::create_at_url(channel, factory, 0)
    }

    /// Create a `Cold` session against a specific position in the channel's
    /// URL sequence. Used when recreating a torn-down session against a
    /// backup URL.
    #[must_use]
    pub fn create_at_url(
        channel: ChannelDescriptor,
        factory: &dyn DecoderFactory,
        url_index: usize,
    ) -> Self {
        let now = Instant::now();
        let url_index = url_index.min(channel.stream_url_count() - 1);
        trace!(channel = %channel.id, url_index, "stream session created");
        Self {
            decoder: factory.create(),
            channel,
            state: SessionState::Cold,
            created_at: now,
            last_progress_at: now,
            active_url_index: url_index,
            fragment_error_count: 0,
            manifest_error_count: 0,
            manifest_parsed: false,
            media_recovery_spent: false,
            quality_labels: Vec::new(),
            sink: None,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelDescriptor {
        &self.channel
    }

    #[must_use]
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn last_progress_at(&self) -> Instant {
        self.last_progress_at
    }

    #[must_use]
    pub fn fragment_error_count(&self) -> u32 {
        self.fragment_error_count
    }

    #[must_use]
    pub fn manifest_error_count(&self) -> u32 {
        self.manifest_error_count
    }

    /// Manifest successfully parsed at least once on the current decoder.
    #[must_use]
    pub fn is_warmed(&self) -> bool {
        self.manifest_parsed
    }

    #[must_use]
    pub fn quality_labels(&self) -> &[String] {
        &self.quality_labels
    }

    #[must_use]
    pub fn active_url_index(&self) -> usize {
        self.active_url_index
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state == SessionState::Destroyed
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Failed | SessionState::Destroyed)
    }

    /// The stream URL this session is currently pointed at.
    #[must_use]
    pub fn current_url(&self) -> &str {
        self.channel
            .stream_url_at(self.active_url_index)
            .unwrap_or(&self.channel.primary_stream_url)
    }

    pub(crate) fn decoder(&self) -> Arc<dyn Decoder> {
        Arc::clone(&self.decoder)
    }

    /// Validate the current URL as a syntactically valid absolute URL.
    ///
    /// Checked before any network call; a malformed URL is a
    /// manifest-unreachable failure of this URL, not a decoder error.
    pub(crate) fn parse_current_url(&self) -> Result<Url, ErrorSignal> {
        let raw = self.current_url();
        Url::parse(raw).map_err(|e| {
            ErrorSignal::manifest(true, format!("invalid absolute stream url {raw:?}: {e}"))
        })
    }

    /// Move into `Loading` ahead of a manifest fetch.
    ///
    /// Valid from every non-terminal state; reload paths re-enter `Loading`
    /// from `Attached`/`Playing`/`Stalled`.
    pub(crate) fn begin_load(&mut self) -> EngineResult<()> {
        match self.state {
            SessionState::Destroyed => Err(EngineError::SessionDestroyed),
            SessionState::Failed => Err(EngineError::InvalidTransition {
                operation: "load",
                state: self.state,
            }),
            _ => {
                self.state = SessionState::Loading;
                Ok(())
            }
        }
    }

    pub(crate) fn note_manifest_parsed(&mut self, info: ManifestInfo) {
        self.manifest_parsed = true;
        self.manifest_error_count = 0;
        self.quality_labels = info.quality_labels;
        debug!(
            channel = %self.channel.id,
            url = self.current_url(),
            quality_levels = self.quality_labels.len(),
            "manifest parsed"
        );
    }

    pub(crate) fn note_manifest_error(&mut self) -> u32 {
        self.manifest_error_count += 1;
        self.manifest_error_count
    }

    /// Ask the decoder to fetch and parse the manifest for the current URL.
    ///
    /// Exclusive-ownership path (fresh creation, cache warming): the session
    /// is not yet shared, so awaiting on it directly is safe. The supervisor
    /// uses the split `begin_load`/`note_*` helpers instead.
    pub async fn load(&mut self) -> Result<ManifestInfo, ErrorSignal> {
        if self.begin_load().is_err() {
            return Err(ErrorSignal::manifest(
                true,
                format!("load on a session in state {:?}", self.state),
            ));
        }
        let url = match self.parse_current_url() {
            Ok(url) => url,
            Err(signal) => {
                self.note_manifest_error();
                return Err(signal);
            }
        };
        match self.decoder.load_manifest(url).await {
            Ok(info) => {
                self.note_manifest_parsed(info.clone());
                Ok(info)
            }
            Err(signal) => {
                self.note_manifest_error();
                Err(signal)
            }
        }
    }

    /// Bind decoder output to a playback sink.
    ///
    /// Valid from `Loading`/`Attached`/`Stalled`. Attaching a `Destroyed`
    /// session is a programming error and fails loudly.
    pub fn attach(&mut self, sink: &SinkHandle) -> EngineResult<()> {
        match self.state {
            SessionState::Destroyed => Err(EngineError::SessionDestroyed),
            SessionState::Loading | SessionState::Attached | SessionState::Stalled => {
                self.decoder.attach_sink(sink.clone());
                self.sink = Some(sink.clone());
                if self.state == SessionState::Loading {
                    self.state = SessionState::Attached;
                }
                Ok(())
            }
            state => Err(EngineError::InvalidTransition {
                operation: "attach",
                state,
            }),
        }
    }

    /// Unbind from the sink, keeping the decoder alive.
    ///
    /// Idempotent. Used when demoting the active session back into the
    /// cache; the session returns to the loaded-but-unbound state.
    pub fn detach(&mut self) {
        if self.sink.take().is_some() {
            self.decoder.detach_sink();
        }
        if matches!(
            self.state,
            SessionState::Attached | SessionState::Playing | SessionState::Stalled
        ) {
            self.state = SessionState::Loading;
        }
    }

    /// Release the decoder handle and everything owned by this session.
    ///
    /// Transitions to `Destroyed` unconditionally, even from `Failed`.
    /// Safe to call twice; the second call is a no-op.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        debug!(channel = %self.channel.id, from = ?self.state, "stream session destroyed");
        self.decoder.destroy();
        self.sink = None;
        self.state = SessionState::Destroyed;
    }

    /// Record one successfully decoded fragment.
    ///
    /// Resets the fragment error count — transient errors stop counting
    /// against failure thresholds once the stream recovers. Returns `true`
    /// when this progress moved the session into `Playing`.
    pub fn record_progress(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.last_progress_at = Instant::now();
        self.fragment_error_count = 0;
        if matches!(self.state, SessionState::Attached | SessionState::Stalled) {
            self.state = SessionState::Playing;
            return true;
        }
        false
    }

    /// Decoder-level media recovery is allowed once per session; a
    /// recreated session gets a fresh allowance with its fresh decoder.
    #[must_use]
    pub(crate) fn media_recovery_spent(&self) -> bool {
        self.media_recovery_spent
    }

    pub(crate) fn mark_media_recovery_spent(&mut self) {
        self.media_recovery_spent = true;
    }

    pub(crate) fn note_fragment_error(&mut self) -> u32 {
        self.fragment_error_count += 1;
        self.fragment_error_count
    }

    /// `Playing`/`Attached` → `Stalled`. Returns `true` on transition.
    pub(crate) fn mark_stalled(&mut self) -> bool {
        if matches!(self.state, SessionState::Playing | SessionState::Attached) {
            self.state = SessionState::Stalled;
            return true;
        }
        false
    }

    pub(crate) fn mark_failed(&mut self) {
        if self.state != SessionState::Destroyed {
            self.state = SessionState::Failed;
        }
    }

    /// Peek the next untried URL in the channel's ordered sequence.
    ///
    /// Does not mutate `active_url_index`; callers confirm with
    /// [`use_backup_url`](Self::use_backup_url).
    #[must_use]
    pub fn next_backup_url(&self) -> Option<&str> {
        self.channel.stream_url_at(self.active_url_index + 1)
    }

    /// Commit to the next backup URL. Returns `false` when exhausted.
    pub fn use_backup_url(&mut self) -> bool {
        if self.active_url_index + 1 < self.channel.stream_url_count() {
            self.active_url_index += 1;
            debug!(
                channel = %self.channel.id,
                url = self.current_url(),
                "advanced to backup stream url"
            );
            true
        } else {
            false
        }
    }
}
