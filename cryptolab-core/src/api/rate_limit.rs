//! Minimum spacing between outbound requests.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Enforces `min_interval` between consecutive requests across all threads
/// sharing the limiter. Callers queue on the lock.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Block until a request may be sent, then claim the slot.
    pub fn acquire(&self) {
        let mut last = self.last_request.lock();
        if let Some(prev) = *last {
            let wait = self.min_interval.saturating_sub(prev.elapsed());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        *last = Some(Instant::now());
    }
}
