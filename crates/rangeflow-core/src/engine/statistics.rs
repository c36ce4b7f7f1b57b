//! Sliding-window throughput for one progress source

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_SPEED_WINDOW: Duration = Duration::from_secs(3);

/// Tracks `(time, cumulative bytes)` samples inside a time window
#[derive(Debug, Clone)]
pub struct TransferStatistics {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl TransferStatistics {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Record the cumulative byte count at `now` and return bytes per second
    pub fn update(&mut self, bytes: u64, now: Instant) -> u64 {
        self.samples.push_back((now, bytes));

        // Keep one sample at or beyond the window edge as the baseline
        while self.samples.len() > 2 {
            let second = self.samples[1].0;
            if now.duration_since(second) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let Some(&(first_time, first_bytes)) = self.samples.front() else {
            return 0;
        };
        let elapsed = now.duration_since(first_time).as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }

        (bytes.saturating_sub(first_bytes) as f64 / elapsed) as u64
    }

    /// Forget history, e.g. while a transfer is paused
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for TransferStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_WINDOW)
    }
}

/// Seconds left at `speed`, if there is any speed to go by
pub fn estimate_eta(remaining: u64, speed: u64) -> Option<u64> {
    if speed == 0 {
        return None;
    }
    Some(remaining.div_ceil(speed))
}
