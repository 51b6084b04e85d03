//! Reconnect backoff

use rand::Rng;
use std::time::Duration;

/// Doubling delay with jitter, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        // up to 20% jitter, never past the cap
        let jitter_ms = (base.as_millis() as u64 / 5).max(1);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        (base + jitter).min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
