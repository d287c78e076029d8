//! Minimum spacing between successive source calls.
//!
//! Free market-data endpoints throttle or ban clients that hit them in a tight
//! loop. The pacer sleeps just long enough that two calls are never closer than
//! `min_gap`; the first call never waits.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Pacer {
    min_gap: Duration,
    last_call: Option<Instant>,
}

impl Pacer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_call: None,
        }
    }

    /// A pacer that never sleeps.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Block until the next call is allowed, then mark it as made.
    /// Returns how long it slept.
    pub fn wait(&mut self) -> Duration {
        let slept = match self.last_call {
            Some(last) if !self.min_gap.is_zero() => {
                let elapsed = last.elapsed();
                if elapsed < self.min_gap {
                    let remaining = self.min_gap - elapsed;
                    std::thread::sleep(remaining);
                    remaining
                } else {
                    Duration::ZERO
                }
            }
            _ => Duration::ZERO,
        };
        self.last_call = Some(Instant::now());
        slept
    }
}

impl Default for Pacer {
    /// Three seconds between calls.
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}
