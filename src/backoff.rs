//! Reconnect backoff schedule.

use embassy_time::Duration;
use rand::Rng;

/// One scheduled wait before the next connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStep {
    /// Doubling delay, before jitter.
    pub base: Duration,
    /// `base` plus a uniform jitter in `0..=base`.
    pub delay: Duration,
}

/// Exponential backoff between `min` and `max` seconds.
///
/// The base delay starts at `min`, doubles on each consecutive failure and
/// is capped at `max`; `reset` after a successful connect restarts at `min`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min_secs: u32,
    max_secs: u32,
    current_secs: u32,
}

impl Backoff {
    pub fn new(min_secs: u32, max_secs: u32) -> Self {
        Self {
            min_secs,
            max_secs: max_secs.max(min_secs),
            current_secs: 0,
        }
    }

    /// Base delay for the next failure, advancing the schedule.
    pub fn next_base(&mut self) -> u32 {
        self.current_secs = if self.current_secs == 0 {
            self.min_secs
        } else {
            self.current_secs.saturating_mul(2).min(self.max_secs)
        };
        self.current_secs
    }

    /// Advances the schedule and draws the jittered delay.
    pub fn next_step(&mut self, rng: &mut impl Rng) -> BackoffStep {
        let base = self.next_base();
        let jitter_ms = rng.random_range(0..=u64::from(base) * 1000);
        BackoffStep {
            base: Duration::from_secs(u64::from(base)),
            delay: Duration::from_millis(u64::from(base) * 1000 + jitter_ms),
        }
    }

    pub fn reset(&mut self) {
        self.current_secs = 0;
    }

    /// Base delay of the last failure, zero after a reset.
    pub fn current(&self) -> u32 {
        self.current_secs
    }
}
