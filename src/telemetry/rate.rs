//! Frame-rate monitoring over fixed one-second windows.

use chrono::{DateTime, Utc};

/// Length of one counting window.
pub const WINDOW: std::time::Duration = std::time::Duration::from_secs(1);

fn window() -> chrono::Duration {
    chrono::Duration::milliseconds(WINDOW.as_millis() as i64)
}

/// Frames counted in one completed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSample {
    /// Start of the window the frames were counted in.
    pub window_start: DateTime<Utc>,
    /// Frames recorded during that window.
    pub frames: u32,
}

/// Counts frames per one-second window.
///
/// Windows advance additively: each completed window moves the start by
/// exactly [`WINDOW`], never to the time of the tick, so the long-run
/// average does not drift.
#[derive(Debug, Clone)]
pub struct RateMonitor {
    count: u32,
    window_start: DateTime<Utc>,
}

impl RateMonitor {
    /// Creates a monitor whose first window opens at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: start,
        }
    }

    /// Counts one frame.
    pub fn record_frame(&mut self) {
        self.count += 1;
    }

    /// Closes the current window if `now` has reached its end.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<RateSample> {
        let start = self.window_start;
        if now < start + window() {
            return None;
        }

        let sample = RateSample {
            window_start: start,
            frames: self.count,
        };
        tracing::debug!("{} frames/sec", sample.frames);

        self.count = 0;
        self.window_start = start + window();
        Some(sample)
    }

    /// Frames counted in the open window.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Start of the open window.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }
}
