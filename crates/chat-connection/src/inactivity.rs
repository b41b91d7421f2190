//! Single-shot inactivity deadline.

use std::time::Duration;

use crate::scheduler::{Scheduler, TimerHandle};

/// Holds at most one pending deadline. Arming always cancels the previous
/// deadline first, so a superseded deadline can never be reported as expired.
#[derive(Debug)]
pub struct InactivityMonitor {
    timeout: Option<Duration>,
    pending: Option<TimerHandle>,
}

impl InactivityMonitor {
    /// `None` leaves the monitor permanently disarmed.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            pending: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Cancel any pending deadline and start a fresh one.
    pub fn arm<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        self.cancel(scheduler);
        if let Some(timeout) = self.timeout {
            self.pending = Some(scheduler.after(timeout));
        }
    }

    pub fn cancel<S: Scheduler + ?Sized>(&mut self, scheduler: &mut S) {
        if let Some(timer) = self.pending.take() {
            scheduler.cancel(timer);
        }
    }

    /// Change the window. An armed monitor restarts with the new value.
    pub fn set_timeout<S: Scheduler + ?Sized>(
        &mut self,
        timeout: Option<Duration>,
        scheduler: &mut S,
    ) {
        self.timeout = timeout;
        if self.is_armed() {
            self.arm(scheduler);
        }
    }

    /// Returns `true` exactly once, when `timer` is the pending deadline.
    pub fn expire(&mut self, timer: TimerHandle) -> bool {
        if self.pending == Some(timer) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
