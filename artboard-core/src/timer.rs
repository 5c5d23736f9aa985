//! Cancellable deadline handle for the timed state machines.
//!
//! The machines in this crate never sleep. Callers feed them the current
//! [`Instant`]; a [`Timer`] only remembers when it is due. Re-arming or
//! cancelling replaces the deadline, so a superseded timer can never fire.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub const fn idle() -> Self {
        Self { deadline: None }
    }

    /// Arm (or re-arm) to fire `after` from `now`.
    pub fn arm(&mut self, now: Instant, after: Duration) {
        self.deadline = Some(now + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed, without consuming it.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Consume the deadline if it has passed. Fires at most once per arm.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}
