#![forbid(unsafe_code)]

use std::{cmp::min, time::Duration};

/// Retry/backoff configuration for the reconnection controller.
///
/// Growth factor, base and ceiling live here, not at call sites.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Recovery gives up once this many attempts have been spent.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub growth_factor: f64,
    /// Ceiling for the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            growth_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        growth_factor: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            growth_factor,
            max_delay,
        }
    }

    /// Backoff delay before retry number `attempt` (1-based).
    ///
    /// Monotonically non-decreasing in `attempt`, bounded by `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.growth_factor.max(1.0).powi(exponent);
        let scaled = self.base_delay.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        min(Duration::from_secs_f64(scaled), self.max_delay)
    }
}

/// Liveness probe configuration for the health monitor.
#[derive(Clone, Debug)]
pub struct HealthOptions {
    pub probe_interval: Duration,
    /// A Playing session with no progress for `probe_interval *
    /// stall_multiplier` is treated as silently stalled.
    pub stall_multiplier: u32,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(10),
            stall_multiplier: 2,
        }
    }
}

impl HealthOptions {
    #[must_use]
    pub fn stall_threshold(&self) -> Duration {
        self.probe_interval * self.stall_multiplier.max(1)
    }
}

/// Configuration for the playback engine.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Preload cache capacity.
    pub cache_capacity: usize,
    /// Consecutive non-fatal fragment errors tolerated before escalating.
    pub fragment_error_ceiling: u32,
    pub retry: RetryPolicy,
    pub health: HealthOptions,
    /// Capacity of the UI event broadcast channel.
    pub events_channel_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 6,
            fragment_error_ceiling: 5,
            retry: RetryPolicy::default(),
            health: HealthOptions::default(),
            events_channel_capacity: 64,
        }
    }
}

impl EngineOptions {
    /// Set preload cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the fragment error ceiling.
    pub fn with_fragment_error_ceiling(mut self, ceiling: u32) -> Self {
        self.fragment_error_ceiling = ceiling;
        self
    }

    /// Set retry/backoff policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set health probe options.
    pub fn with_health(mut self, health: HealthOptions) -> Self {
        self.health = health;
        self
    }

    /// Set events broadcast channel capacity.
    pub fn with_events_channel_capacity(mut self, capacity: usize) -> Self {
        self.events_channel_capacity = capacity;
        self
    }
}
