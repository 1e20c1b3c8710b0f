#![forbid(unsafe_code)]

//! Periodic liveness probe for the active session.
//!
//! Catches sessions that claim `Playing` but silently stopped producing
//! data without ever raising a decoder error. The monitor never mutates
//! session state: it reads, and routes a synthetic persistent-network error
//! to the reconnection machinery. Sessions already under recovery are
//! exempt, so probe and retries never race on one session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use zapline_core::ChannelId;

use crate::{classify::ErrorClass, options::HealthOptions};

/// What the probe found when the active session looked stalled.
#[derive(Clone, Debug)]
pub(crate) struct StallReport {
    pub channel: ChannelId,
    pub silent_for: Duration,
}

/// Read-and-signal view of the coordinator's active session.
pub(crate) trait ProbeTarget: Send + Sync {
    /// Report the active session if it claims `Playing`, has no recovery in
    /// flight, and has made no progress for longer than `threshold`.
    fn stalled_since(&self, threshold: Duration) -> Option<StallReport>;

    /// Route a synthetic error class to the active session's supervisor.
    fn report_synthetic(&self, class: ErrorClass);
}

pub(crate) struct HealthMonitor;

impl HealthMonitor {
    /// Spawn the probe loop. Stops when `cancel` fires.
    pub(crate) fn spawn<T>(
        options: HealthOptions,
        target: std::sync::Arc<T>,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: ProbeTarget + 'static,
    {
        tokio::spawn(async move {
            let period = options.probe_interval;
            let threshold = options.stall_threshold();
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match target.stalled_since(threshold) {
                    Some(report) => {
                        warn!(
                            channel = %report.channel,
                            silent_for_secs = report.silent_for.as_secs(),
                            "session claims Playing but produced no data, triggering recovery"
                        );
                        target.report_synthetic(ErrorClass::PersistentNetwork);
                    }
                    None => trace!("health probe: active session looks live"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    };

    use super::*;

    struct FakeTarget {
        probes: AtomicUsize,
        synthetics: AtomicU32,
        /// Reports a stall on every probe when set.
        stalled: bool,
    }

    impl FakeTarget {
        fn new(stalled: bool) -> Arc<Self> {
            Arc::new(Self {
                probes: AtomicUsize::new(0),
                synthetics: AtomicU32::new(0),
                stalled,
            })
        }
    }

    impl ProbeTarget for FakeTarget {
        fn stalled_since(&self, _threshold: Duration) -> Option<StallReport> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.stalled.then(|| StallReport {
                channel: ChannelId::new("a"),
                silent_for: Duration::from_secs(25),
            })
        }

        fn report_synthetic(&self, class: ErrorClass) {
            assert_eq!(class, ErrorClass::PersistentNetwork);
            self.synthetics.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn options() -> HealthOptions {
        HealthOptions {
            probe_interval: Duration::from_secs(10),
            stall_multiplier: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_progress_generates_no_synthetic_error() {
        let target = FakeTarget::new(false);
        let cancel = CancellationToken::new();
        let handle = HealthMonitor::spawn(options(), Arc::clone(&target), cancel.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(target.probes.load(Ordering::SeqCst) >= 3);
        assert_eq!(target.synthetics.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_session_triggers_synthetic_persistent_network() {
        let target = FakeTarget::new(true);
        let cancel = CancellationToken::new();
        let handle = HealthMonitor::spawn(options(), Arc::clone(&target), cancel.clone());

        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(target.synthetics.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_probe_fires_before_the_first_interval() {
        let target = FakeTarget::new(true);
        let cancel = CancellationToken::new();
        let _handle = HealthMonitor::spawn(options(), Arc::clone(&target), cancel.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(target.probes.load(Ordering::SeqCst), 0);
        cancel.cancel();
    }
}
