//! Reconnection, backoff, backup-URL failover, and the health probe.

mod common;

use std::time::Duration;

use common::*;
use zapline_decode::{DecoderEvent, ErrorSignal};
use zapline_engine::{EngineOptions, HealthOptions, RetryPolicy, SessionState};

#[tokio::test]
async fn transient_errors_accumulate_attempts_without_teardown() {
    let (coordinator, factory) = engine(&["a"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    for expected in 1..=3u32 {
        coordinator.report_decoder_error(ErrorSignal::network(false, "socket hiccup"));
        wait_for("attempt to be recorded", || {
            coordinator.status().recovery_attempts == Some(expected)
        })
        .await;
    }

    let status = coordinator.status();
    assert_eq!(status.recovery_attempts, Some(3));
    assert_eq!(status.session_state, Some(SessionState::Stalled));
    // Below the budget: no teardown, same decoder, no reload.
    assert_eq!(factory.created_count(), 1);
    assert!(!factory.decoders()[0].is_destroyed());
    assert_eq!(factory.load_count(&stream_url("a")), 1);
}

#[tokio::test]
async fn progress_resets_the_recovery_episode() {
    let (coordinator, factory) = engine(&["a"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    coordinator.report_decoder_error(ErrorSignal::network(false, "socket hiccup"));
    wait_for("attempt to be recorded", || {
        coordinator.status().recovery_attempts == Some(1)
    })
    .await;

    active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    wait_for("session to recover", || {
        coordinator.status().session_state == Some(SessionState::Playing)
    })
    .await;

    // Back to Playing: the controller is gone, its budget with it.
    assert_eq!(coordinator.status().recovery_attempts, None);
}

#[tokio::test(start_paused = true)]
async fn persistent_error_backs_off_then_reloads_and_recovers() {
    let (coordinator, factory) = engine(&["a"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let mut events = coordinator.events();

    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::network(true, "connection refused"),
    });

    wait_for("reload after backoff", || {
        factory.load_count(&stream_url("a")) == 2
    })
    .await;
    assert_eq!(factory.created_count(), 1); // same session, reloaded in place

    active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    wait_for("session to recover", || {
        coordinator.status().session_state == Some(SessionState::Playing)
    })
    .await;

    let events = drain(&mut events);
    let saw_recovering = events.iter().any(|e| {
        matches!(
            e,
            zapline_events::Event::Playback(zapline_events::PlaybackEvent::Recovering {
                attempt: 1,
                ..
            })
        )
    });
    assert!(saw_recovering, "expected a Recovering event, got {events:?}");
    assert_eq!(failed_count(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn manifest_error_midstream_fails_over_to_the_backup_url() {
    let mut ch = channel("a");
    ch.backup_stream_urls = vec!["https://backup.example/a.m3u8".to_owned()];
    let dir = zapline_core::ChannelDirectory::new(vec![ch]);
    let (coordinator, factory) = engine_with(
        dir,
        EngineOptions::default().with_retry(fast_retry()),
    );
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let first_decoder = factory.decoders()[0].clone();

    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::manifest(true, "http 404"),
    });

    wait_for("backup url to load", || {
        factory.load_count("https://backup.example/a.m3u8") == 1
    })
    .await;

    // Torn down and recreated: old decoder released before the new one ran.
    assert!(first_decoder.is_destroyed());
    assert_eq!(factory.created_count(), 2);

    active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    wait_for("session to recover on the backup", || {
        coordinator.status().session_state == Some(SessionState::Playing)
    })
    .await;
    assert_eq!(coordinator.status().active_channel, Some(id("a")));
}

#[tokio::test(start_paused = true)]
async fn manifest_errors_exhausting_every_url_fail_exactly_once() {
    let mut ch = channel("a");
    ch.backup_stream_urls = vec!["https://backup.example/a.m3u8".to_owned()];
    let dir = zapline_core::ChannelDirectory::new(vec![ch]);
    let (coordinator, factory) = engine_with(
        dir,
        EngineOptions::default().with_retry(fast_retry()),
    );
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let mut events = coordinator.events();

    // The failover load against the backup URL fails too.
    factory.fail_manifest_once(
        "https://backup.example/a.m3u8",
        ErrorSignal::manifest(true, "http 404"),
    );
    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::manifest(true, "http 404"),
    });

    wait_for("terminal failure", || {
        coordinator.status().active_channel.is_none()
    })
    .await;
    settle().await;

    let events = drain(&mut events);
    assert_eq!(failed_count(&events), 1);
    assert!(factory.decoders().iter().all(|d| d.is_destroyed()));
}

#[tokio::test(start_paused = true)]
async fn media_corruption_recovers_in_place_once_then_recreates() {
    let (coordinator, factory) = engine(&["a"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let first_decoder = factory.decoders()[0].clone();

    // First corruption: decoder-level recovery, no teardown.
    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::media(true, "buffer append failed"),
    });
    wait_for("decoder-level recovery", || {
        first_decoder.recover_calls() == 1
    })
    .await;
    assert_eq!(factory.created_count(), 1);

    active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    wait_for("session to recover", || {
        coordinator.status().session_state == Some(SessionState::Playing)
    })
    .await;

    // Recurring corruption on the same session: teardown+recreate.
    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::media(true, "buffer append failed"),
    });
    wait_for("session to be recreated", || factory.created_count() == 2).await;
    assert!(first_decoder.is_destroyed());
    // The in-place recovery ran exactly once per session.
    assert_eq!(first_decoder.recover_calls(), 1);
    assert_eq!(factory.decoders()[1].recover_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unsupported_stream_fails_without_retrying() {
    let (coordinator, factory) = engine(&["a"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let mut events = coordinator.events();

    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::media(true, "codec not supported"),
    });

    wait_for("terminal failure", || {
        coordinator.status().active_channel.is_none()
    })
    .await;
    settle().await;

    let events = drain(&mut events);
    assert_eq!(failed_count(&events), 1);
    // No reload was attempted.
    assert_eq!(factory.load_count(&stream_url("a")), 1);
    assert_eq!(factory.created_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_surface_a_single_failure() {
    let (coordinator, factory) = engine_with(
        directory(&["a"]),
        EngineOptions::default().with_retry(RetryPolicy::new(
            2,
            Duration::from_millis(50),
            2.0,
            Duration::from_secs(1),
        )),
    );
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let mut events = coordinator.events();

    // Every backoff reload keeps failing with a persistent network error.
    for _ in 0..4 {
        factory.fail_manifest_once(
            stream_url("a"),
            ErrorSignal::network(true, "connection refused"),
        );
    }
    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::network(true, "connection refused"),
    });

    wait_for("terminal failure", || {
        coordinator.status().active_channel.is_none()
    })
    .await;
    settle().await;

    let events = drain(&mut events);
    assert_eq!(failed_count(&events), 1);
    assert!(factory.decoders().iter().all(|d| d.is_destroyed()));
}

#[tokio::test(start_paused = true)]
async fn switching_channels_cancels_a_pending_retry() {
    let (coordinator, factory) = engine(&["a", "b"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    // Schedule a backoff retry for A...
    active_decoder(&factory).emit(DecoderEvent::FatalError {
        signal: ErrorSignal::network(true, "connection refused"),
    });
    wait_for("retry to be scheduled", || {
        coordinator.status().recovery_attempts == Some(1)
    })
    .await;

    // ...then switch away before it fires.
    coordinator.select_channel(&id("b")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    // Long past the retry deadline: the superseded session never reloads.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(factory.load_count(&stream_url("a")), 1);
    assert_eq!(coordinator.status().active_channel, Some(id("b")));
}

#[tokio::test]
async fn health_probe_recovers_a_silently_stalled_session() {
    let (coordinator, factory) = engine_with(
        directory(&["a"]),
        EngineOptions::default()
            .with_retry(RetryPolicy::new(
                8,
                Duration::from_millis(10),
                2.0,
                Duration::from_millis(100),
            ))
            .with_health(HealthOptions {
                probe_interval: Duration::from_millis(50),
                stall_multiplier: 2,
            }),
    );
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    // Produce nothing further: the probe must notice the silent stall and
    // drive a reload through the reconnection controller.
    wait_for("health-triggered reload", || {
        factory.load_count(&stream_url("a")) >= 2
    })
    .await;

    active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    wait_for("session to recover", || {
        coordinator.status().session_state == Some(SessionState::Playing)
    })
    .await;
}

#[tokio::test]
async fn health_probe_stays_quiet_while_progress_is_fresh() {
    let (coordinator, factory) = engine_with(
        directory(&["a"]),
        EngineOptions::default().with_health(HealthOptions {
            probe_interval: Duration::from_millis(100),
            stall_multiplier: 3,
        }),
    );
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    // Keep feeding fragments well inside the stall threshold.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    }

    assert_eq!(factory.load_count(&stream_url("a")), 1);
    assert_eq!(coordinator.status().recovery_attempts, None);
    assert_eq!(
        coordinator.status().session_state,
        Some(SessionState::Playing)
    );
}

#[tokio::test]
async fn fragment_errors_below_the_ceiling_are_left_to_the_decoder() {
    let (coordinator, factory) = engine_with(
        directory(&["a"]),
        EngineOptions::default()
            .with_retry(fast_retry())
            .with_fragment_error_ceiling(3),
    );
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;

    for _ in 0..2 {
        active_decoder(&factory).emit(DecoderEvent::FragmentError {
            signal: ErrorSignal::fragment(false, "segment timeout"),
        });
    }
    settle().await;
    // Two non-fatal errors: still the decoder's problem.
    assert_eq!(coordinator.status().recovery_attempts, None);

    // Progress resets the consecutive-error count.
    active_decoder(&factory).emit(DecoderEvent::FragmentLoaded { bytes: 1024 });
    settle().await;
    for _ in 0..2 {
        active_decoder(&factory).emit(DecoderEvent::FragmentError {
            signal: ErrorSignal::fragment(false, "segment timeout"),
        });
    }
    settle().await;
    assert_eq!(coordinator.status().recovery_attempts, None);

    // The third consecutive error crosses the ceiling and escalates.
    active_decoder(&factory).emit(DecoderEvent::FragmentError {
        signal: ErrorSignal::fragment(false, "segment timeout"),
    });
    wait_for("escalation to the controller", || {
        coordinator.status().recovery_attempts == Some(1)
    })
    .await;
}

#[tokio::test]
async fn quality_switches_are_surfaced_to_the_ui() {
    let (coordinator, factory) = engine(&["a"]);
    coordinator.select_channel(&id("a")).await.unwrap();
    drive_playing(&coordinator, &factory).await;
    let mut events = coordinator.events();

    active_decoder(&factory).emit(DecoderEvent::QualitySwitched {
        label: "720p".to_owned(),
    });
    settle().await;

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        zapline_events::Event::Playback(zapline_events::PlaybackEvent::QualityChanged {
            label,
            ..
        }) if label == "720p"
    )));
}
