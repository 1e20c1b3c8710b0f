#![forbid(unsafe_code)]

//! Top-level playback façade.
//!
//! The coordinator owns the active session, promotes warmed sessions out of
//! the preload cache on channel switches, and spawns one supervisor task
//! per active session to run recovery. Single-writer rule: all mutations of
//! a session's state go through the coordinator or the one supervisor
//! instance bound to it, identified by a generation counter. A supervisor
//! or timer outliving its generation detects that on the next lock and
//! becomes a no-op.
//!
//! Lock ordering: the coordinator lock is always taken before the cache
//! lock, never the other way around.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use zapline_core::{ChannelDescriptor, ChannelDirectory, ChannelId};
use zapline_decode::{DecoderEvent, DecoderFactory, ErrorSignal, SinkHandle};
use zapline_events::{Event, EventBus, PlaybackEvent};

use crate::{
    classify::{ErrorClass, classify},
    error::{EngineError, EngineResult},
    health::{HealthMonitor, ProbeTarget, StallReport},
    options::EngineOptions,
    preload::{CacheKey, PreloadCache},
    reconnect::{ReconnectionController, RecoveryAction},
    session::{SessionState, StreamSession},
};

/// Snapshot of the engine for the UI layer.
#[derive(Clone, Debug)]
pub struct EngineStatus {
    pub active_channel: Option<ChannelId>,
    pub session_state: Option<SessionState>,
    pub recovery_attempts: Option<u32>,
}

enum SupervisorMsg {
    /// An externally reported raw decoder error.
    Signal(ErrorSignal),
    /// A pre-classified error (health monitor probe).
    Synthetic(ErrorClass),
}

struct ActiveEntry {
    session: StreamSession,
    generation: u64,
    controller: Option<ReconnectionController>,
    pending_retry: bool,
    msg_tx: mpsc::Sender<SupervisorMsg>,
    cancel: CancellationToken,
}

struct Inner {
    directory: ChannelDirectory,
    active: Option<ActiveEntry>,
    generation: u64,
    shutdown: bool,
}

impl Inner {
    fn entry_mut(&mut self, generation: u64) -> Option<&mut ActiveEntry> {
        self.active.as_mut().filter(|a| a.generation == generation)
    }
}

/// Playback coordinator: the only engine component exposed to the UI.
///
/// Must be created inside a Tokio runtime; it spawns the health monitor and
/// supervisor tasks.
pub struct PlaybackCoordinator {
    inner: Arc<Mutex<Inner>>,
    events: EventBus,
    factory: Arc<dyn DecoderFactory>,
    sink: SinkHandle,
    options: EngineOptions,
    cache: PreloadCache,
    cancel: CancellationToken,
}

impl PlaybackCoordinator {
    #[must_use]
    pub fn new(
        directory: ChannelDirectory,
        factory: Arc<dyn DecoderFactory>,
        sink: SinkHandle,
        options: EngineOptions,
    ) -> Self {
        let events = EventBus::new(options.events_channel_capacity);
        let cancel = CancellationToken::new();
        let cache = PreloadCache::new(options.cache_capacity, events.clone(), cancel.child_token());
        let inner = Arc::new(Mutex::new(Inner {
            directory,
            active: None,
            generation: 0,
            shutdown: false,
        }));

        let probe = Arc::new(CoordinatorProbe {
            inner: Arc::clone(&inner),
        });
        let _ = HealthMonitor::spawn(options.health.clone(), probe, cancel.child_token());

        Self {
            inner,
            events,
            factory,
            sink,
            options,
            cache,
            cancel,
        }
    }

    /// Subscribe to the engine's event stream.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let inner = self.inner.lock();
        EngineStatus {
            active_channel: inner
                .active
                .as_ref()
                .map(|a| a.session.channel_id().clone()),
            session_state: inner.active.as_ref().map(|a| a.session.state()),
            recovery_attempts: inner
                .active
                .as_ref()
                .and_then(|a| a.controller.as_ref())
                .map(ReconnectionController::attempts),
        }
    }

    /// Replace the channel directory; neighbors are re-derived and
    /// re-warmed for the active channel.
    pub fn set_channels(&self, channels: Vec<ChannelDescriptor>) {
        let active = {
            let mut inner = self.inner.lock();
            inner.directory.set_channels(channels);
            inner.active.as_ref().map(|a| a.session.channel().clone())
        };
        if let Some(channel) = active {
            self.warm_neighbors(&channel);
        }
    }

    /// Change the category filter; neighbors are re-derived and re-warmed.
    pub fn set_filter(&self, category: Option<String>) {
        let active = {
            let mut inner = self.inner.lock();
            inner.directory.set_filter(category);
            inner.active.as_ref().map(|a| a.session.channel().clone())
        };
        if let Some(channel) = active {
            self.warm_neighbors(&channel);
        }
    }

    /// Switch to `id`, promoting a warmed session when one is cached.
    ///
    /// The previous active session is detached and demoted back into the
    /// cache when it is warm and capacity allows, otherwise destroyed. On a
    /// cache miss the fresh session walks the channel's URL sequence once
    /// before the channel is declared failed (exactly one `Failed` event).
    /// Neighbor warming happens asynchronously and never blocks this call.
    pub async fn select_channel(&self, id: &ChannelId) -> EngineResult<()> {
        let (channel, generation) = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(EngineError::ShutDown);
            }
            let channel = inner
                .directory
                .get(id)
                .cloned()
                .ok_or_else(|| EngineError::ChannelNotFound(id.clone()))?;
            if inner
                .active
                .as_ref()
                .is_some_and(|a| a.session.channel_id() == id)
            {
                trace!(channel = %id, "channel already active, ignoring selection");
                return Ok(());
            }

            inner.generation += 1;
            let generation = inner.generation;

            if let Some(mut prev) = inner.active.take() {
                prev.cancel.cancel();
                self.cache.set_protected(None);
                prev.session.detach();
                if prev.session.is_warmed()
                    && !prev.session.is_terminal()
                    && self.cache.len() < self.options.cache_capacity
                {
                    let key = CacheKey::new(
                        prev.session.channel_id().clone(),
                        prev.session.current_url().to_owned(),
                    );
                    debug!(channel = %key.channel, "demoting previous active session into cache");
                    self.cache.put(key, prev.session, true);
                } else {
                    prev.session.destroy();
                }
            }
            (channel, generation)
        };

        self.events.publish(PlaybackEvent::Loading {
            channel: id.clone(),
        });

        let session = match self.cache.promote(&CacheKey::for_channel(&channel)) {
            // Warmed: attach directly, no duplicate manifest load.
            Some(session) => session,
            None => {
                let mut session = StreamSession::create(channel.clone(), self.factory.as_ref());
                loop {
                    match session.load().await {
                        Ok(_) => break,
                        Err(signal) => {
                            let class = classify(&signal);
                            warn!(
                                channel = %channel.id,
                                url = session.current_url(),
                                error = %signal,
                                "initial manifest load failed"
                            );
                            if class == ErrorClass::Unsupported || !session.use_backup_url() {
                                session.destroy();
                                let reason = if class == ErrorClass::Unsupported {
                                    class.label().to_owned()
                                } else {
                                    "manifest unreachable on all stream urls".to_owned()
                                };
                                self.events.publish(PlaybackEvent::Failed {
                                    channel: channel.id.clone(),
                                    reason: reason.clone(),
                                });
                                return Err(EngineError::ChannelFailed {
                                    channel: channel.id.clone(),
                                    reason,
                                });
                            }
                        }
                    }
                }
                session
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.shutdown || inner.generation != generation {
                // Superseded while loading: never attached, destroy quietly.
                let mut session = session;
                session.destroy();
                return Ok(());
            }
            let mut session = session;
            if let Err(e) = session.attach(&self.sink) {
                session.destroy();
                return Err(e);
            }
            self.install_active(&mut inner, session, generation);
        }

        self.warm_neighbors(&channel);
        Ok(())
    }

    /// Switch to the next channel in the filtered ordering (wraps around).
    pub async fn next(&self) -> EngineResult<ChannelId> {
        let target = self
            .adjacent(|directory, current| directory.next_after(current))?
            .ok_or(EngineError::EmptyDirectory)?;
        self.select_channel(&target.id).await?;
        Ok(target.id)
    }

    /// Switch to the previous channel in the filtered ordering (wraps
    /// around).
    pub async fn previous(&self) -> EngineResult<ChannelId> {
        let target = self
            .adjacent(|directory, current| directory.prev_before(current))?
            .ok_or(EngineError::EmptyDirectory)?;
        self.select_channel(&target.id).await?;
        Ok(target.id)
    }

    fn adjacent(
        &self,
        pick: impl Fn(&ChannelDirectory, &ChannelId) -> Option<ChannelDescriptor>,
    ) -> EngineResult<Option<ChannelDescriptor>> {
        let inner = self.inner.lock();
        if inner.shutdown {
            return Err(EngineError::ShutDown);
        }
        let current = inner.active.as_ref().map(|a| a.session.channel_id().clone());
        Ok(match current {
            Some(current) => pick(&inner.directory, &current),
            None => inner.directory.first().cloned(),
        })
    }

    /// Classify a raw decoder error and forward it to the active session's
    /// recovery machinery.
    pub fn report_decoder_error(&self, signal: ErrorSignal) {
        let inner = self.inner.lock();
        match inner.active.as_ref() {
            Some(entry) => {
                let _ = entry.msg_tx.try_send(SupervisorMsg::Signal(signal));
            }
            None => debug!(error = %signal, "decoder error reported with no active session"),
        }
    }

    /// Stop the health monitor, cancel pending retries and in-flight warm
    /// effects, evict the cache, and destroy the active session.
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return;
            }
            inner.shutdown = true;
            if let Some(mut entry) = inner.active.take() {
                entry.cancel.cancel();
                entry.session.destroy();
            }
        }
        self.cancel.cancel();
        self.cache.close();
        self.cache.evict_all();
        debug!("playback engine shut down");
    }

    fn install_active(&self, inner: &mut Inner, session: StreamSession, generation: u64) {
        let (msg_tx, msg_rx) = mpsc::channel(16);
        let cancel = self.cancel.child_token();
        let decoder_rx = session.decoder().subscribe();
        let channel_id = session.channel_id().clone();

        self.cache.set_protected(Some(CacheKey::new(
            channel_id.clone(),
            session.current_url().to_owned(),
        )));
        debug!(channel = %channel_id, generation, "session activated");

        inner.active = Some(ActiveEntry {
            session,
            generation,
            controller: None,
            pending_retry: false,
            msg_tx,
            cancel: cancel.clone(),
        });

        let supervisor = Supervisor {
            inner: Arc::clone(&self.inner),
            cache: self.cache.clone(),
            events: self.events.clone(),
            factory: Arc::clone(&self.factory),
            sink: self.sink.clone(),
            options: self.options.clone(),
            generation,
            cancel,
            channel: channel_id,
        };
        tokio::spawn(supervisor.run(decoder_rx, msg_rx));
    }

    /// Warm the previous/next neighbors of `channel` in the filtered
    /// ordering. Spawned per neighbor; never blocks the caller.
    fn warm_neighbors(&self, channel: &ChannelDescriptor) {
        let neighbors = { self.inner.lock().directory.neighbors(&channel.id) };
        let Some(neighbors) = neighbors else { return };

        let mut targets = vec![neighbors.previous];
        if neighbors.next.id != targets[0].id {
            targets.push(neighbors.next);
        }
        for neighbor in targets {
            if neighbor.id == channel.id {
                continue;
            }
            let cache = self.cache.clone();
            let factory = Arc::clone(&self.factory);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    () = cache.warm(factory, neighbor) => {}
                }
            });
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct CoordinatorProbe {
    inner: Arc<Mutex<Inner>>,
}

impl ProbeTarget for CoordinatorProbe {
    fn stalled_since(&self, threshold: Duration) -> Option<StallReport> {
        let inner = self.inner.lock();
        let entry = inner.active.as_ref()?;
        if entry.session.state() != SessionState::Playing {
            return None;
        }
        // A session under active recovery is exempt; probe and retries must
        // not race on one session.
        if entry.controller.is_some() || entry.pending_retry {
            return None;
        }
        let silent_for = entry.session.last_progress_at().elapsed();
        (silent_for > threshold).then(|| StallReport {
            channel: entry.session.channel_id().clone(),
            silent_for,
        })
    }

    fn report_synthetic(&self, class: ErrorClass) {
        let inner = self.inner.lock();
        if let Some(entry) = inner.active.as_ref() {
            let _ = entry.msg_tx.try_send(SupervisorMsg::Synthetic(class));
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

enum ReloadResult {
    Ok,
    /// The supervised session is gone or superseded; stop quietly.
    Gone,
    Err(ErrorClass),
}

/// Per-active-session supervisor: consumes decoder events and synthetic
/// errors, executes the reconnection controller's actions, owns the retry
/// timer.
struct Supervisor {
    inner: Arc<Mutex<Inner>>,
    cache: PreloadCache,
    events: EventBus,
    factory: Arc<dyn DecoderFactory>,
    sink: SinkHandle,
    options: EngineOptions,
    generation: u64,
    cancel: CancellationToken,
    channel: ChannelId,
}

impl Supervisor {
    async fn run(
        mut self,
        mut decoder_rx: broadcast::Receiver<DecoderEvent>,
        mut msg_rx: mpsc::Receiver<SupervisorMsg>,
    ) {
        let cancel = self.cancel.clone();
        let mut pending: Option<tokio::time::Instant> = None;

        loop {
            let deadline = pending;
            let flow = tokio::select! {
                _ = cancel.cancelled() => break,
                () = async move {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    pending = None;
                    self.on_retry_timer(&mut pending, &mut decoder_rx).await
                }
                event = decoder_rx.recv() => match event {
                    Ok(event) => self.on_decoder_event(event, &mut pending, &mut decoder_rx).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %self.channel, skipped, "decoder event stream lagged");
                        Flow::Continue
                    }
                    Err(broadcast::error::RecvError::Closed) => Flow::Stop,
                },
                msg = msg_rx.recv() => match msg {
                    Some(SupervisorMsg::Signal(signal)) => {
                        let class = classify(&signal);
                        self.dispatch(class, signal.fatal, &mut pending, &mut decoder_rx).await
                    }
                    Some(SupervisorMsg::Synthetic(class)) => {
                        self.dispatch(class, true, &mut pending, &mut decoder_rx).await
                    }
                    None => Flow::Stop,
                },
            };
            if matches!(flow, Flow::Stop) {
                break;
            }
        }
        trace!(channel = %self.channel, generation = self.generation, "supervisor exited");
    }

    async fn on_decoder_event(
        &mut self,
        event: DecoderEvent,
        pending: &mut Option<tokio::time::Instant>,
        decoder_rx: &mut broadcast::Receiver<DecoderEvent>,
    ) -> Flow {
        match event {
            DecoderEvent::FragmentLoaded { .. } => {
                let became_playing = {
                    let mut inner = self.inner.lock();
                    let Some(entry) = inner.entry_mut(self.generation) else {
                        return Flow::Stop;
                    };
                    let became_playing = entry.session.record_progress();
                    // Back to healthy: the recovery episode (and its timer)
                    // ends here.
                    entry.controller = None;
                    entry.pending_retry = false;
                    became_playing
                };
                *pending = None;
                if became_playing {
                    self.events.publish(PlaybackEvent::Playing {
                        channel: self.channel.clone(),
                    });
                }
                Flow::Continue
            }
            DecoderEvent::FragmentError { signal } => {
                let escalate = {
                    let mut inner = self.inner.lock();
                    let Some(entry) = inner.entry_mut(self.generation) else {
                        return Flow::Stop;
                    };
                    let count = entry.session.note_fragment_error();
                    signal.fatal || count >= self.options.fragment_error_ceiling
                };
                if escalate {
                    self.dispatch(classify(&signal), true, pending, decoder_rx)
                        .await
                } else {
                    // Below the ceiling: the decoder's internal retries get
                    // to handle it.
                    Flow::Continue
                }
            }
            DecoderEvent::BufferStalled => {
                let stalled = {
                    let mut inner = self.inner.lock();
                    let Some(entry) = inner.entry_mut(self.generation) else {
                        return Flow::Stop;
                    };
                    entry.session.mark_stalled()
                };
                if stalled {
                    self.events.publish(PlaybackEvent::Stalled {
                        channel: self.channel.clone(),
                        reason: "buffer underrun".to_owned(),
                    });
                }
                Flow::Continue
            }
            DecoderEvent::FatalError { signal } => {
                self.dispatch(classify(&signal), true, pending, decoder_rx)
                    .await
            }
            DecoderEvent::QualitySwitched { label } => {
                self.events.publish(PlaybackEvent::QualityChanged {
                    channel: self.channel.clone(),
                    label,
                });
                Flow::Continue
            }
            DecoderEvent::ManifestParsed { .. } => Flow::Continue,
            _ => Flow::Continue,
        }
    }

    async fn on_retry_timer(
        &mut self,
        pending: &mut Option<tokio::time::Instant>,
        decoder_rx: &mut broadcast::Receiver<DecoderEvent>,
    ) -> Flow {
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entry_mut(self.generation) else {
                // Timer fired for a superseded/destroyed session: no-op.
                return Flow::Stop;
            };
            entry.pending_retry = false;
        }
        match self.reload().await {
            ReloadResult::Ok => Flow::Continue,
            ReloadResult::Gone => Flow::Stop,
            ReloadResult::Err(class) => self.dispatch(class, true, pending, decoder_rx).await,
        }
    }

    /// Run the controller's policy for one classified error and execute the
    /// resulting actions until the session is either waiting (on a timer,
    /// on decoder progress) or failed.
    ///
    /// Each loop iteration consumes one attempt from the budget, so this
    /// cannot spin: it terminates in at most `max_attempts` iterations.
    async fn dispatch(
        &mut self,
        class: ErrorClass,
        fatal: bool,
        pending: &mut Option<tokio::time::Instant>,
        decoder_rx: &mut broadcast::Receiver<DecoderEvent>,
    ) -> Flow {
        let mut class = class;
        let mut fatal = fatal;
        loop {
            let (action, attempt, of, stalled_now) = {
                let mut inner = self.inner.lock();
                let Some(entry) = inner.entry_mut(self.generation) else {
                    return Flow::Stop;
                };
                if entry.session.is_destroyed() {
                    return Flow::Stop;
                }
                let stalled_now = entry.session.mark_stalled();
                let policy = self.options.retry.clone();
                let media_recovery_available = !entry.session.media_recovery_spent();
                let ctl = entry
                    .controller
                    .get_or_insert_with(|| ReconnectionController::new(policy));
                let action = ctl.on_error(class, media_recovery_available);
                if matches!(action, RecoveryAction::RecoverMedia) {
                    entry.session.mark_media_recovery_spent();
                }
                (action, ctl.attempts(), ctl.max_attempts(), stalled_now)
            };

            if stalled_now {
                self.events.publish(PlaybackEvent::Stalled {
                    channel: self.channel.clone(),
                    reason: class.label().to_owned(),
                });
            }

            match action {
                RecoveryAction::RetryNow => {
                    self.publish_recovering(attempt, of);
                    if !fatal {
                        // The decoder is still running and retries the
                        // request itself; the budget was charged, now wait
                        // for progress or the next error.
                        return Flow::Continue;
                    }
                    match self.reload().await {
                        ReloadResult::Ok => return Flow::Continue,
                        ReloadResult::Gone => return Flow::Stop,
                        ReloadResult::Err(next) => {
                            class = next;
                            fatal = true;
                        }
                    }
                }
                RecoveryAction::RetryAfter(delay) => {
                    self.publish_recovering(attempt, of);
                    {
                        let mut inner = self.inner.lock();
                        if let Some(entry) = inner.entry_mut(self.generation) {
                            entry.pending_retry = true;
                        }
                    }
                    *pending = Some(tokio::time::Instant::now() + delay);
                    debug!(
                        channel = %self.channel,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retry scheduled"
                    );
                    return Flow::Continue;
                }
                RecoveryAction::RecoverMedia => {
                    self.publish_recovering(attempt, of);
                    let decoder = {
                        let mut inner = self.inner.lock();
                        let Some(entry) = inner.entry_mut(self.generation) else {
                            return Flow::Stop;
                        };
                        entry.session.decoder()
                    };
                    match decoder.recover_media().await {
                        Ok(()) => return Flow::Continue,
                        Err(signal) => {
                            class = classify(&signal);
                            fatal = true;
                        }
                    }
                }
                RecoveryAction::AdvanceUrl => {
                    self.publish_recovering(attempt, of);
                    match self.recreate(decoder_rx, true).await {
                        ReloadResult::Ok => return Flow::Continue,
                        ReloadResult::Gone => return Flow::Stop,
                        ReloadResult::Err(next) => {
                            class = next;
                            fatal = true;
                        }
                    }
                }
                RecoveryAction::Recreate => {
                    self.publish_recovering(attempt, of);
                    match self.recreate(decoder_rx, false).await {
                        ReloadResult::Ok => return Flow::Continue,
                        ReloadResult::Gone => return Flow::Stop,
                        ReloadResult::Err(next) => {
                            class = next;
                            fatal = true;
                        }
                    }
                }
                RecoveryAction::GiveUp { reason } => {
                    self.fail(&reason);
                    return Flow::Stop;
                }
            }
        }
    }

    /// Re-fetch the manifest for the active session's current URL and
    /// re-attach. Live channels reconnect by reloading from scratch; there
    /// is no resume position.
    async fn reload(&self) -> ReloadResult {
        let (decoder, url) = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entry_mut(self.generation) else {
                return ReloadResult::Gone;
            };
            if entry.session.begin_load().is_err() {
                return ReloadResult::Gone;
            }
            match entry.session.parse_current_url() {
                Ok(url) => (entry.session.decoder(), url),
                Err(signal) => {
                    entry.session.note_manifest_error();
                    return ReloadResult::Err(classify(&signal));
                }
            }
        };

        trace!(channel = %self.channel, url = %url, "reloading manifest");
        match decoder.load_manifest(url).await {
            Ok(info) => {
                let mut inner = self.inner.lock();
                let Some(entry) = inner.entry_mut(self.generation) else {
                    return ReloadResult::Gone;
                };
                if entry.session.is_destroyed() {
                    return ReloadResult::Gone;
                }
                entry.session.note_manifest_parsed(info);
                match entry.session.attach(&self.sink) {
                    Ok(()) => ReloadResult::Ok,
                    Err(_) => ReloadResult::Gone,
                }
            }
            Err(signal) => {
                let mut inner = self.inner.lock();
                let Some(entry) = inner.entry_mut(self.generation) else {
                    return ReloadResult::Gone;
                };
                entry.session.note_manifest_error();
                ReloadResult::Err(classify(&signal))
            }
        }
    }

    /// Tear the active session down and recreate it in place, optionally
    /// advancing to the next backup URL. The old session is destroyed
    /// exactly once before the replacement exists; the recovery episode
    /// (controller, attempts) carries over.
    async fn recreate(
        &mut self,
        decoder_rx: &mut broadcast::Receiver<DecoderEvent>,
        advance_url: bool,
    ) -> ReloadResult {
        enum Swap {
            Done(broadcast::Receiver<DecoderEvent>),
            Exhausted,
            Gone,
        }

        let swap = {
            let mut inner = self.inner.lock();
            match inner.entry_mut(self.generation) {
                None => Swap::Gone,
                Some(entry) => {
                    let url_index = if advance_url {
                        entry
                            .session
                            .next_backup_url()
                            .map(|_| entry.session.active_url_index() + 1)
                    } else {
                        Some(entry.session.active_url_index())
                    };
                    match url_index {
                        None => Swap::Exhausted,
                        Some(url_index) => {
                            let channel = entry.session.channel().clone();
                            entry.session.destroy();
                            let fresh = StreamSession::create_at_url(
                                channel,
                                self.factory.as_ref(),
                                url_index,
                            );
                            let rx = fresh.decoder().subscribe();
                            self.cache.set_protected(Some(CacheKey::new(
                                fresh.channel_id().clone(),
                                fresh.current_url().to_owned(),
                            )));
                            debug!(
                                channel = %fresh.channel_id(),
                                url = fresh.current_url(),
                                "recreated session for recovery"
                            );
                            entry.session = fresh;
                            entry.pending_retry = false;
                            Swap::Done(rx)
                        }
                    }
                }
            }
        };

        match swap {
            Swap::Gone => ReloadResult::Gone,
            Swap::Exhausted => {
                self.fail("manifest unreachable on all stream urls");
                ReloadResult::Gone
            }
            Swap::Done(rx) => {
                *decoder_rx = rx;
                self.reload().await
            }
        }
    }

    /// Surface terminal failure: exactly one `Failed` event, the session
    /// destroyed, the active slot cleared.
    fn fail(&self, reason: &str) {
        let channel = {
            let mut inner = self.inner.lock();
            match inner.active.take() {
                Some(mut entry) if entry.generation == self.generation => {
                    entry.session.mark_failed();
                    entry.session.destroy();
                    entry.session.channel_id().clone()
                }
                other => {
                    inner.active = other;
                    return;
                }
            }
        };
        self.cache.set_protected(None);
        warn!(channel = %channel, reason, "channel failed terminally");
        self.events.publish(PlaybackEvent::Failed {
            channel,
            reason: reason.to_owned(),
        });
    }

    fn publish_recovering(&self, attempt: u32, of: u32) {
        self.events.publish(PlaybackEvent::Recovering {
            channel: self.channel.clone(),
            attempt,
            of,
        });
    }
}
