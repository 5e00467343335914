//! Time source and blocking waits.
//!
//! Everything that stamps frames or sleeps between retries goes through a
//! [`Clock`], so the capture loop can be driven deterministically.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Fixed delay inserted before every retry after a recoverable failure.
pub const BACKOFF: Duration = Duration::from_secs(1);

/// Wall-clock time plus blocking sleep.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock.
///
/// Every call to [`Clock::now`] advances time by `step`, and sleeps advance
/// time by the requested duration without blocking. Sleeps are recorded.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
    step: Duration,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Creates a clock starting at `start` that ticks `step` per reading.
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
            step,
        }
    }

    /// Starts at the Unix epoch with a 1ms step.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::default(), Duration::from_millis(1))
    }

    /// Returns every sleep requested so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned clock only happens after a test thread panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut state = self.lock();
        state.now = add(state.now, self.step);
        state.now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.now = add(state.now, duration);
        state.sleeps.push(duration);
    }
}

fn add(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_strictly_increasing() {
        let clock = ManualClock::at_epoch();
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }

    #[test]
    fn test_manual_clock_records_sleeps() {
        let clock = ManualClock::new(DateTime::<Utc>::default(), Duration::ZERO);
        clock.sleep(BACKOFF);
        clock.sleep(BACKOFF);

        assert_eq!(clock.sleeps(), vec![BACKOFF, BACKOFF]);
        assert_eq!(clock.now().timestamp(), 2);
    }
}
