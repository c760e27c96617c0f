//! Retry backoff policy shared by outbound callers.
//!
//! Exponential backoff (`initial × multiplier^attempt`, capped at `max_backoff`)
//! with optional proportional jitter so concurrent callers spread their retries.

use rand::Rng;
use std::time::Duration;

/// Configuration for retry backoff.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the exponential part of the backoff.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Fraction of the computed backoff added as random jitter (0.0 disables jitter).
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// A policy without jitter, for deterministic schedules.
    pub fn fixed(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            jitter_ratio: 0.0,
            ..Default::default()
        }
    }

    /// A policy that never waits.
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO, Duration::ZERO)
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let backoff = self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64).max(0.0) as u64;

        Duration::from_millis(backoff_ms)
    }

    /// Backoff before retry number `attempt` (0-based), including jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }

        let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        let jitter_ms = (base.as_millis() as f64 * self.jitter_ratio * factor) as u64;
        base + Duration::from_millis(jitter_ms)
    }
}
