use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A triggerable flag the executor sleeps on between polls.
///
/// Transports trigger it from their receive threads when data lands in a
/// subscriber queue, which cuts the executor's wait short.
#[derive(Debug, Default)]
pub struct GuardCondition {
    triggered: Mutex<bool>,
    cv: Condvar,
}

impl GuardCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self.triggered.lock();
        *triggered = true;
        self.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock()
    }

    /// Wait until triggered or `timeout` elapses, then reset the flag.
    ///
    /// Returns whether the condition was triggered.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock();
        while !*triggered {
            if self.cv.wait_until(&mut triggered, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *triggered, false)
    }
}
