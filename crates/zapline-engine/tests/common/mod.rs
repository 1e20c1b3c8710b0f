//! Shared fixtures for the engine integration suites.

use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;
use zapline_core::{ChannelDescriptor, ChannelDirectory, ChannelId};
use zapline_decode::{
    DecoderEvent, SinkHandle,
    testing::{FakeDecoder, FakeDecoderFactory},
};
use zapline_engine::{EngineOptions, PlaybackCoordinator, RetryPolicy, SessionState};
use zapline_events::Event;

pub fn stream_url(id: &str) -> String {
    format!("https://cdn.example/{id}.m3u8")
}

pub fn channel(id: &str) -> ChannelDescriptor {
    ChannelDescriptor::new(id, id.to_uppercase(), stream_url(id)).with_category("live")
}

pub fn directory(ids: &[&str]) -> ChannelDirectory {
    ChannelDirectory::new(ids.iter().map(|id| channel(id)).collect())
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(8, Duration::from_millis(100), 2.0, Duration::from_secs(5))
}

pub fn engine_with(
    directory: ChannelDirectory,
    options: EngineOptions,
) -> (PlaybackCoordinator, Arc<FakeDecoderFactory>) {
    let factory = Arc::new(FakeDecoderFactory::new());
    let coordinator = PlaybackCoordinator::new(
        directory,
        factory.clone() as Arc<dyn zapline_decode::DecoderFactory>,
        SinkHandle::new("test-sink"),
        options,
    );
    (coordinator, factory)
}

pub fn engine(ids: &[&str]) -> (PlaybackCoordinator, Arc<FakeDecoderFactory>) {
    engine_with(
        directory(ids),
        EngineOptions::default().with_retry(fast_retry()),
    )
}

/// Let spawned tasks run without advancing (virtual) time.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Poll `cond` until it holds; panics with `label` on timeout. Sleeps
/// between polls, so under a paused clock this advances virtual time.
pub async fn wait_for(label: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {label}");
}

/// The decoder currently bound to the sink.
pub fn active_decoder(factory: &FakeDecoderFactory) -> Arc<FakeDecoder> {
    factory
        .decoders()
        .into_iter()
        .find(|d| d.is_attached())
        .expect("no decoder is attached to the sink")
}

/// Emit one decoded fragment on the active decoder and wait for `Playing`.
pub async fn drive_playing(coordinator: &PlaybackCoordinator, factory: &FakeDecoderFactory) {
    settle().await;
    active_decoder(factory).emit(DecoderEvent::FragmentLoaded { bytes: 4096 });
    wait_for("session to reach Playing", || {
        coordinator.status().session_state == Some(SessionState::Playing)
    })
    .await;
}

pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub fn failed_count(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::Playback(zapline_events::PlaybackEvent::Failed { .. })))
        .count()
}

pub fn id(s: &str) -> ChannelId {
    ChannelId::new(s)
}
