// src/timer.rs
//! Deadline timers for the main thread's cooperative queue.
//!
//! Timers never run code on their own. The host loop asks each owner for its
//! next deadline, sleeps until the earliest one, and then lets owners check
//! `fire_if_due`. Cancelling is therefore synchronous: once `cancel` returns,
//! the timer cannot fire.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arms the timer one interval after `now`. Re-arming moves the deadline.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    /// Arms only if not already pending, so redundant triggers do not push the
    /// retry further out.
    pub fn arm_if_idle(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.arm(now);
        }
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

    /// One-shot: returns `true` and disarms if the deadline has passed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Earliest of several optional deadlines.
pub fn earliest<I>(deadlines: I) -> Option<Instant>
where
    I: IntoIterator<Item = Option<Instant>>,
{
    deadlines.into_iter().flatten().min()
}
