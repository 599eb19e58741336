//! Notification throttle
//!
//! The first change after a quiet period is emitted immediately. Changes that
//! arrive within `interval` of the last emission are coalesced into a single
//! trailing emission at the interval boundary, which always carries the
//! latest value because the caller reads it at that moment.

use std::time::Duration;

use tokio::time::Instant;

/// Leading- and trailing-edge rate limiter driven by explicit timestamps
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_emit: Option<Instant>,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a change at `now`. Returns `true` if the caller should notify
    /// right away; otherwise a trailing notification is scheduled.
    pub fn hit(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            self.last_emit = Some(now);
            return true;
        }
        if self.deadline.is_some() {
            return false;
        }

        match self.last_emit {
            Some(last) if now < last + self.interval => {
                self.deadline = Some(last + self.interval);
                false
            }
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Returns `true` once the scheduled trailing notification is due
    pub fn due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.last_emit = Some(now);
                true
            }
            _ => false,
        }
    }

    /// When the pending trailing notification fires, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drop any pending notification and forget the last emission
    pub fn reset(&mut self) {
        self.deadline = None;
        self.last_emit = None;
    }
}
