//! Single-resolution cell
//!
//! A `ResolutionCell` carries exactly one value from whoever resolves it to
//! whoever waits on it. It can be resolved before anyone waits. Once a
//! wait times out, or the cell is closed, later resolutions are refused,
//! so a late answer can never be delivered twice or to the wrong caller.
//!
//! Waiting comes in two forms: [`wait_blocking`](ResolutionCell::wait_blocking)
//! parks an OS thread and is meant for workflow code running on its own
//! thread or inside `spawn_blocking`; [`wait`](ResolutionCell::wait) is the
//! async form for tasks.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug)]
enum Slot<T> {
    Empty,
    Resolved(T),
    Taken,
    Closed,
}

/// How a wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Resolved(T),
    TimedOut,
    /// Closed without a value, or the value was already taken
    Closed,
}

/// Write-once, read-once synchronization cell
#[derive(Debug)]
pub struct ResolutionCell<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    notify: Notify,
}

impl<T> Default for ResolutionCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResolutionCell<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Store `value`; returns false if the cell was already resolved or closed
    pub fn resolve(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Empty) {
            return false;
        }
        *slot = Slot::Resolved(value);
        drop(slot);
        self.wake();
        true
    }

    /// Refuse further resolutions
    ///
    /// If a value is already stored it is taken and returned instead:
    /// resolution that happened first wins.
    pub fn close(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        let value = match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Resolved(value) => {
                *slot = Slot::Taken;
                Some(value)
            }
            Slot::Taken => {
                *slot = Slot::Taken;
                None
            }
            Slot::Empty | Slot::Closed => None,
        };
        drop(slot);
        self.wake();
        value
    }

    /// Close the cell unless a value already reached it
    ///
    /// Returns true when no value was ever stored. Unlike
    /// [`close`](Self::close) a stored value stays for the waiter.
    pub fn withdraw(&self) -> bool {
        let mut slot = self.slot.lock();
        let withdrawn = match *slot {
            Slot::Empty => {
                *slot = Slot::Closed;
                true
            }
            Slot::Closed => true,
            Slot::Resolved(_) | Slot::Taken => false,
        };
        drop(slot);
        self.wake();
        withdrawn
    }

    /// Take the value if one is stored, without waiting
    pub fn try_take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        match Self::take_ready(&mut slot) {
            Some(WaitOutcome::Resolved(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Resolved(_))
    }

    /// Check if the cell can still be resolved
    pub fn is_open(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Empty)
    }

    /// Block the current thread until resolved, closed or `timeout` elapses
    ///
    /// Must not be called from an async worker thread.
    pub fn wait_blocking(&self, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = Self::take_ready(&mut slot) {
                return outcome;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        return Self::expire(&mut slot);
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
    }

    /// Wait asynchronously until resolved, closed or `timeout` elapses
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome<T> {
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        loop {
            let ready = {
                let mut slot = self.slot.lock();
                Self::take_ready(&mut slot)
            };
            if let Some(outcome) = ready {
                return outcome;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = &mut sleep => {
                    let mut slot = self.slot.lock();
                    return Self::expire(&mut slot);
                }
            }
        }
    }

    fn wake(&self) {
        self.ready.notify_all();
        // notify_one stores a permit when nobody is parked yet
        self.notify.notify_one();
    }

    fn take_ready(slot: &mut Slot<T>) -> Option<WaitOutcome<T>> {
        match std::mem::replace(slot, Slot::Taken) {
            Slot::Resolved(value) => Some(WaitOutcome::Resolved(value)),
            Slot::Empty => {
                *slot = Slot::Empty;
                None
            }
            Slot::Closed => {
                *slot = Slot::Closed;
                Some(WaitOutcome::Closed)
            }
            Slot::Taken => Some(WaitOutcome::Closed),
        }
    }

    // Deadline passed: a value that raced in still wins, otherwise seal the cell
    fn expire(slot: &mut Slot<T>) -> WaitOutcome<T> {
        match Self::take_ready(slot) {
            Some(outcome) => outcome,
            None => {
                *slot = Slot::Closed;
                WaitOutcome::TimedOut
            }
        }
    }
}
