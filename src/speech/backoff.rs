//! Restart delay for the speech session

use std::time::Duration;

use crate::config::SpeechConfig;

/// Multiplicative restart backoff
///
/// Grows by `multiplier` after every unplanned recognizer end, capped at
/// `max`. Resets to `initial` once the recognizer is listening again.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    /// Create a backoff starting at `initial`
    #[must_use]
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            current: initial.min(max),
            multiplier,
            max,
        }
    }

    /// Delay to use for the next restart
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Grow the delay after an unplanned end
    pub fn grow(&mut self) {
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
    }

    /// Back to the initial delay
    pub const fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl From<&SpeechConfig> for Backoff {
    fn from(config: &SpeechConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            config.backoff_multiplier,
            Duration::from_millis(config.max_backoff_ms),
        )
    }
}
