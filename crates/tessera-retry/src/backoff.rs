//! Exponential backoff between in-region retries.

use std::time::Duration;

/// Doubling delay capped at `max`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            max,
            current: initial,
        }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay_duration(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}
