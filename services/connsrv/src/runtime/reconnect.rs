//! Reconnection backoff
//!
//! Exponential backoff with an optional ±25% jitter. The helper only computes
//! delays; the transport client owns the timer so a disconnect can cancel it.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::core::config::ReconnectConfig;

/// Reconnection policy configuration
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Ceiling for any delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

/// Reconnection statistics tracking
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_failures: u64,
    pub successful_connects: u64,
    pub last_connected: Option<Instant>,
}

/// Tracks consecutive failures of one endpoint
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    /// Consecutive failed attempts since the last success
    failures: u32,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    /// Mark the connection as successful and reset the backoff
    pub fn mark_connected(&mut self) {
        self.failures = 0;
        self.stats.successful_connects += 1;
        self.stats.last_connected = Some(Instant::now());
        debug!("Connection marked as successful");
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.stats.total_failures += 1;
    }

    /// No attempts left under the policy
    pub fn is_exhausted(&self) -> bool {
        self.policy.max_attempts > 0 && self.failures >= self.policy.max_attempts
    }

    /// Backoff delay for the current failure count, without jitter
    pub fn base_delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.policy.backoff_multiplier.max(1.0).powi(exponent);
        let max_ms = self.policy.max_delay.as_millis() as f64;
        // an overflowing factor is clamped to the ceiling
        let delay_ms = (self.policy.initial_delay.as_millis() as f64 * factor).min(max_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before the next attempt, or `None` once exhausted
    pub fn next_delay(&self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let mut delay = self.base_delay();
        if self.policy.jitter && !delay.is_zero() {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            delay = Duration::from_millis(delay_ms as u64);
        }
        Some(delay)
    }
}
