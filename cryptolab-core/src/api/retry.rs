//! Retry budget and exponential backoff with jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry parameters for the API client.
///
/// Rate-limit responses (429) may use up to `max_attempts` attempts in total.
/// Server errors, timeouts and connection failures get `max_server_retries`
/// additional attempts. Both share the same backoff curve:
/// `base_delay * multiplier^n`, capped at `max_delay`, with equal jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_server_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_server_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting at all. Used by tests and dry runs.
    pub fn immediate(max_attempts: u32, max_server_retries: u32) -> Self {
        Self {
            max_attempts,
            max_server_retries,
            base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Un-jittered delay before retry number `retry` (0-based), capped.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Equal-jitter delay: half the ceiling plus `jitter` (0..=1) of the other half.
    pub fn delay_with_jitter(&self, retry: u32, jitter: f64) -> Duration {
        let ceiling = self.ceiling(retry);
        let half = ceiling / 2;
        half + (ceiling - half).mul_f64(jitter.clamp(0.0, 1.0))
    }

    /// Delay before retry number `retry`, jittered from the thread RNG.
    ///
    /// A provider `Retry-After` hint wins when it is longer, still capped at
    /// `max_delay`.
    pub fn next_delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..=1.0);
        let delay = self.delay_with_jitter(retry, jitter);
        match retry_after {
            Some(hint) if hint > delay => hint.min(self.max_delay()),
            _ => delay,
        }
    }
}
