#![forbid(unsafe_code)]

//! Scriptable decoder double for engine tests.
//!
//! [`FakeDecoder`] answers `load_manifest` from a per-URL script (defaulting
//! to success), records every call, and tracks attach/destroy bookkeeping so
//! tests can assert on resource-safety invariants across a whole factory:
//! how many decoders are bound to a sink right now, how often a URL was
//! loaded, which decoders were destroyed.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use url::Url;

use crate::{
    event::{DecoderEvent, ManifestInfo},
    signal::{ErrorDomain, ErrorSignal},
    traits::{Decoder, DecoderFactory, SinkHandle},
};

#[derive(Default)]
struct FactoryState {
    scripted_manifest: Mutex<HashMap<String, VecDeque<Result<ManifestInfo, ErrorSignal>>>>,
    load_calls: Mutex<Vec<String>>,
    decoders: Mutex<Vec<Arc<FakeDecoder>>>,
    attached_now: AtomicUsize,
    max_attached: AtomicUsize,
}

/// Factory producing [`FakeDecoder`]s and aggregating their bookkeeping.
#[derive(Clone, Default)]
pub struct FakeDecoderFactory {
    state: Arc<FactoryState>,
}

impl FakeDecoderFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one `load_manifest` failure for `url`; consumed in FIFO order.
    /// Calls with no queued entry succeed.
    pub fn fail_manifest_once<S: Into<String>>(&self, url: S, signal: ErrorSignal) {
        self.state
            .scripted_manifest
            .lock()
            .entry(url.into())
            .or_default()
            .push_back(Err(signal));
    }

    /// Queue one `load_manifest` success for `url` with a specific manifest.
    pub fn answer_manifest_once<S: Into<String>>(&self, url: S, info: ManifestInfo) {
        self.state
            .scripted_manifest
            .lock()
            .entry(url.into())
            .or_default()
            .push_back(Ok(info));
    }

    /// Number of `load_manifest` calls seen for `url` across all decoders.
    #[must_use]
    pub fn load_count(&self, url: &str) -> usize {
        self.state
            .load_calls
            .lock()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    /// Every `load_manifest` URL in call order.
    #[must_use]
    pub fn load_calls(&self) -> Vec<String> {
        self.state.load_calls.lock().clone()
    }

    #[must_use]
    pub fn total_loads(&self) -> usize {
        self.state.load_calls.lock().len()
    }

    /// Decoders created so far, in creation order.
    #[must_use]
    pub fn decoders(&self) -> Vec<Arc<FakeDecoder>> {
        self.state.decoders.lock().clone()
    }

    #[must_use]
    pub fn last_decoder(&self) -> Option<Arc<FakeDecoder>> {
        self.state.decoders.lock().last().cloned()
    }

    #[must_use]
    pub fn created_count(&self) -> usize {
        self.state.decoders.lock().len()
    }

    /// Decoders currently bound to a sink.
    #[must_use]
    pub fn attached_now(&self) -> usize {
        self.state.attached_now.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously attached decoders.
    #[must_use]
    pub fn max_attached(&self) -> usize {
        self.state.max_attached.load(Ordering::SeqCst)
    }
}

impl DecoderFactory for FakeDecoderFactory {
    fn create(&self) -> Arc<dyn Decoder> {
        let (events, _) = broadcast::channel(64);
        let decoder = Arc::new(FakeDecoder {
            factory: Arc::clone(&self.state),
            events,
            attached: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            recover_calls: AtomicUsize::new(0),
            scripted_recover: Mutex::new(VecDeque::new()),
        });
        self.state.decoders.lock().push(Arc::clone(&decoder));
        decoder
    }
}

/// One scriptable decoder instance.
pub struct FakeDecoder {
    factory: Arc<FactoryState>,
    events: broadcast::Sender<DecoderEvent>,
    attached: AtomicBool,
    destroyed: AtomicBool,
    recover_calls: AtomicUsize,
    scripted_recover: Mutex<VecDeque<ErrorSignal>>,
}

impl FakeDecoder {
    /// Push an event to this decoder's subscribers.
    pub fn emit(&self, event: DecoderEvent) {
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Queue one `recover_media` failure.
    pub fn fail_recover_once(&self, signal: ErrorSignal) {
        self.scripted_recover.lock().push_back(signal);
    }

    #[must_use]
    pub fn recover_calls(&self) -> usize {
        self.recover_calls.load(Ordering::SeqCst)
    }

    fn mark_attached(&self) {
        if !self.attached.swap(true, Ordering::SeqCst) {
            let now = self.factory.attached_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.factory.max_attached.fetch_max(now, Ordering::SeqCst);
        }
    }

    fn mark_detached(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            self.factory.attached_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Decoder for FakeDecoder {
    async fn load_manifest(&self, url: Url) -> Result<ManifestInfo, ErrorSignal> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ErrorSignal::new(
                ErrorDomain::Network,
                true,
                "load_manifest on destroyed decoder",
            ));
        }

        let key = url.to_string();
        self.factory.load_calls.lock().push(key.clone());

        let scripted = self
            .factory
            .scripted_manifest
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(Err(signal)) => Err(signal),
            Some(Ok(info)) => {
                self.emit(DecoderEvent::ManifestParsed { info: info.clone() });
                Ok(info)
            }
            None => {
                let info = ManifestInfo::new(vec!["480p", "720p"]);
                self.emit(DecoderEvent::ManifestParsed { info: info.clone() });
                Ok(info)
            }
        }
    }

    fn attach_sink(&self, _sink: SinkHandle) {
        self.mark_attached();
    }

    fn detach_sink(&self) {
        self.mark_detached();
    }

    async fn recover_media(&self) -> Result<(), ErrorSignal> {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
        match self.scripted_recover.lock().pop_front() {
            Some(signal) => Err(signal),
            None => Ok(()),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.events.subscribe()
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.mark_detached();
        }
    }
}
