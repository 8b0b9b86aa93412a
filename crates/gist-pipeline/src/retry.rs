//! Exponential backoff schedule with jitter, shared by fetch and LLM retries.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::config::RetryConfig;

/// Caps the exponent so the doubling cannot overflow long before the
/// configured ceiling kicks in.
const MAX_SHIFT: u32 = 5;

/// Backoff schedule as data: the delay for attempt `n` is
/// `base * 2^n` capped at `max`, with a random jitter fraction applied to
/// spread out synchronized retry storms.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self { base, max, jitter }
    }

    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.jitter)
    }

    /// Delay before retrying after failed attempt `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_SHIFT);
        let capped = self.base.saturating_mul(factor).min(self.max);
        self.apply_jitter(capped)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let swing = rand::rng().random_range(-self.jitter..=self.jitter);
        delay.mul_f64(1.0 + swing)
    }
}

/// Wait out `delay`, waking early when the shutdown flag flips. Returns
/// `false` when interrupted so callers can stop retrying.
pub async fn sleep_unless_shutdown(
    delay: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    }
}
