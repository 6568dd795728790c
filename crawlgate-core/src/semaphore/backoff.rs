use std::time::Duration;

use rand::Rng;

use crate::config::BackoffOptions;

/// Growth factor applied to the delay after every failed attempt.
const GROWTH: f64 = 1.5;

/// Retry delay sequence for a blocking acquire.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(options: &BackoffOptions) -> Self {
        Self {
            delay: options.base_delay.min(options.max_delay),
            max: options.max_delay,
        }
    }

    /// Delay to sleep before the next attempt, jitter included. Advances the
    /// sequence.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = grow(current, self.max);
        current + jitter(current)
    }
}

/// Scale by the growth factor and cap at `max`.
pub fn grow(delay: Duration, max: Duration) -> Duration {
    delay.mul_f64(GROWTH).min(max)
}

/// Uniform jitter in `[0, delay / 4)`.
pub fn jitter(delay: Duration) -> Duration {
    let bound = delay.as_millis() as u64 / 4;
    if bound == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..bound))
}
