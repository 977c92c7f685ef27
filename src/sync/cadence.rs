//! Absolute-deadline cadence scheduling
//!
//! Deadlines are always `start + tick * interval`. A late iteration never
//! shifts later deadlines, so jitter does not accumulate into drift.

use std::time::Duration;
use tracing::{debug, trace};

/// Shortest interval a scheduler accepts
const MIN_INTERVAL: Duration = Duration::from_nanos(1);

/// Result of polling the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// The current tick's deadline has passed
    Due {
        /// Deadline of the current tick
        deadline: Duration,
        /// How far past the deadline `now` is
        lag: Duration,
    },
    /// Wait this long before the deadline
    Pending(Duration),
}

/// Fixed-rate tick scheduler
///
/// The caller decides when a tick is complete by calling [`advance`];
/// polling alone never moves the schedule.
///
/// [`advance`]: CadenceScheduler::advance
#[derive(Debug, Clone)]
pub struct CadenceScheduler {
    start: Duration,
    tick: u64,
    interval: Duration,
}

impl CadenceScheduler {
    /// Create a scheduler whose tick 0 is due at `start`
    ///
    /// A zero `interval` is raised to one nanosecond.
    pub fn new(start: Duration, interval: Duration) -> Self {
        Self {
            start,
            tick: 0,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Re-base the schedule so tick 0 is due at `now`
    pub fn restart(&mut self, now: Duration) {
        self.start = now;
        self.tick = 0;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of completed ticks since the last restart
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    /// Deadline of the current (not yet completed) tick
    pub fn next_deadline(&self) -> Duration {
        let offset = self.interval.as_nanos().saturating_mul(self.tick as u128);
        self.start + Duration::from_nanos(offset.min(u64::MAX as u128) as u64)
    }

    /// Compare `now` against the current deadline
    pub fn poll(&self, now: Duration) -> Cadence {
        let deadline = self.next_deadline();
        match deadline.checked_sub(now) {
            Some(wait) if !wait.is_zero() => Cadence::Pending(wait),
            _ => Cadence::Due {
                deadline,
                lag: now.saturating_sub(deadline),
            },
        }
    }

    /// Index of the grid slot containing `now` (0 before `start`)
    pub fn slot_at(&self, now: Duration) -> u64 {
        let elapsed = now.saturating_sub(self.start);
        (elapsed.as_nanos() / self.interval.as_nanos()).min(u64::MAX as u128) as u64
    }

    /// Mark the current tick complete
    pub fn advance(&mut self) {
        self.tick += 1;
        trace!("Cadence advanced to tick {}", self.tick);
    }

    /// Drop grid slots that are more than `max_lag_ticks` intervals overdue
    ///
    /// Deadlines stay aligned to `start + k * interval`. Returns the number of
    /// slots skipped.
    pub fn skip_missed(&mut self, now: Duration, max_lag_ticks: u64) -> u64 {
        let deadline = self.next_deadline();
        let Some(lag) = now.checked_sub(deadline) else {
            return 0;
        };

        let behind = (lag.as_nanos() / self.interval.as_nanos()).min(u64::MAX as u128) as u64;
        if behind <= max_lag_ticks {
            return 0;
        }

        let skipped = behind - max_lag_ticks;
        self.tick += skipped;
        debug!(
            "Cadence {:.1}ms behind, skipped {} ticks",
            lag.as_secs_f64() * 1000.0,
            skipped
        );
        skipped
    }
}
