//! Table of outstanding waits keyed by checkpoint or request ID
//!
//! Each key maps to at most one live [`ResolutionCell`]. Resolving or
//! releasing a key removes it from the table before touching the cell, so
//! whichever side gets there first owns the outcome and the other finds
//! nothing to do.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::cell::ResolutionCell;

/// A wait is already registered under this key
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("A wait is already registered for {0}")]
pub struct AlreadyRegistered(pub String);

/// One outstanding wait
#[derive(Debug)]
pub struct PendingWait<T> {
    cell: Arc<ResolutionCell<T>>,
    registered_at: Instant,
    deadline: Option<Instant>,
}

impl<T> PendingWait<T> {
    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Outstanding waits, at most one per key
#[derive(Debug)]
pub struct PendingTable<K, T>
where
    K: Eq + Hash,
{
    waits: DashMap<K, PendingWait<T>>,
}

impl<K, T> Default for PendingTable<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            waits: DashMap::new(),
        }
    }
}

impl<K, T> PendingTable<K, T>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the cell for `key` before anyone can answer it
    pub fn register(
        &self,
        key: K,
        timeout: Duration,
    ) -> Result<Arc<ResolutionCell<T>>, AlreadyRegistered> {
        match self.waits.entry(key) {
            Entry::Occupied(occupied) => Err(AlreadyRegistered(occupied.key().to_string())),
            Entry::Vacant(vacant) => {
                let cell = Arc::new(ResolutionCell::new());
                let now = Instant::now();
                vacant.insert(PendingWait {
                    cell: Arc::clone(&cell),
                    registered_at: now,
                    deadline: now.checked_add(timeout),
                });
                Ok(cell)
            }
        }
    }

    /// Hand `value` to the waiter on `key`
    ///
    /// Returns false when nobody is waiting (never registered, already
    /// answered, timed out or released).
    pub fn resolve(&self, key: &K, value: T) -> bool {
        match self.waits.remove(key) {
            Some((_, wait)) => wait.cell.resolve(value),
            None => false,
        }
    }

    /// Close the wait on `key` without a value; returns whether one was open
    pub fn release(&self, key: &K) -> bool {
        match self.waits.remove(key) {
            Some((_, wait)) => {
                wait.cell.close();
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `key` if it still holds `cell`
    ///
    /// Used by a waiter cleaning up after itself; a newer registration
    /// under the same key is left alone.
    pub fn forget(&self, key: &K, cell: &Arc<ResolutionCell<T>>) -> bool {
        self.waits
            .remove_if(key, |_, wait| Arc::ptr_eq(&wait.cell, cell))
            .is_some()
    }

    /// Push the deadline of `key` to `timeout` from now, if it still holds `cell`
    pub fn restamp(&self, key: &K, cell: &Arc<ResolutionCell<T>>, timeout: Duration) -> bool {
        match self.waits.get_mut(key) {
            Some(mut wait) if Arc::ptr_eq(&wait.cell, cell) => {
                wait.deadline = Instant::now().checked_add(timeout);
                true
            }
            _ => false,
        }
    }

    pub fn deadline_of(&self, key: &K) -> Option<Instant> {
        self.waits.get(key).and_then(|wait| wait.deadline)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.waits.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.waits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waits.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.waits.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Keys whose deadline has passed
    pub fn overdue(&self, now: Instant) -> Vec<K> {
        self.waits
            .iter()
            .filter(|entry| entry.deadline.map(|d| d <= now).unwrap_or(false))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Release every wait; returns how many were open
    pub fn drain(&self) -> usize {
        self.keys().iter().filter(|key| self.release(key)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::WaitOutcome;

    #[test]
    fn test_one_wait_per_key() {
        let table: PendingTable<String, u32> = PendingTable::new();
        table.register("cp-1".to_string(), Duration::from_secs(1)).unwrap();
        assert_eq!(
            table.register("cp-1".to_string(), Duration::from_secs(1)).unwrap_err(),
            AlreadyRegistered("cp-1".to_string())
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_early_resolution_lands_in_slot() {
        let table: PendingTable<String, &str> = PendingTable::new();
        let cell = table.register("req".to_string(), Duration::from_secs(1)).unwrap();

        assert!(table.resolve(&"req".to_string(), "yes"));
        assert!(!table.contains(&"req".to_string()));
        assert_eq!(cell.wait_blocking(Duration::from_millis(1)), WaitOutcome::Resolved("yes"));
    }

    #[test]
    fn test_late_resolution_is_noop() {
        let table: PendingTable<String, u32> = PendingTable::new();
        let key = "req".to_string();
        let cell = table.register(key.clone(), Duration::from_millis(5)).unwrap();

        assert_eq!(cell.wait_blocking(Duration::from_millis(5)), WaitOutcome::TimedOut);
        assert!(table.forget(&key, &cell));
        assert!(!table.resolve(&key, 1));
    }

    #[test]
    fn test_restamp_only_own_registration() {
        let table: PendingTable<String, u32> = PendingTable::new();
        let key = "cp".to_string();
        let cell = table.register(key.clone(), Duration::from_secs(24 * 3600)).unwrap();

        assert!(table.restamp(&key, &cell, Duration::from_secs(60)));
        let deadline = table.deadline_of(&key).unwrap();
        assert!(deadline <= Instant::now() + Duration::from_secs(60));
        assert_eq!(table.overdue(Instant::now() + Duration::from_secs(120)), vec![key.clone()]);

        let stranger = Arc::new(ResolutionCell::new());
        assert!(!table.restamp(&key, &stranger, Duration::from_secs(3600)));
        assert_eq!(table.deadline_of(&key), Some(deadline));
    }

    #[test]
    fn test_forget_leaves_newer_registration() {
        let table: PendingTable<String, u32> = PendingTable::new();
        let key = "cp".to_string();
        let old = table.register(key.clone(), Duration::from_secs(1)).unwrap();
        assert!(table.resolve(&key, 1));

        let _new = table.register(key.clone(), Duration::from_secs(1)).unwrap();
        assert!(!table.forget(&key, &old));
        assert!(table.contains(&key));
    }

    #[test]
    fn test_release_and_drain() {
        let table: PendingTable<String, u32> = PendingTable::new();
        let a = table.register("a".to_string(), Duration::from_secs(1)).unwrap();
        table.register("b".to_string(), Duration::from_secs(1)).unwrap();

        assert!(table.release(&"a".to_string()));
        assert!(!table.release(&"a".to_string()));
        assert_eq!(a.wait_blocking(Duration::from_millis(1)), WaitOutcome::Closed);

        assert_eq!(table.drain(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_overdue() {
        let table: PendingTable<String, u32> = PendingTable::new();
        table.register("soon".to_string(), Duration::from_millis(1)).unwrap();
        table.register("later".to_string(), Duration::from_secs(3600)).unwrap();

        let overdue = table.overdue(Instant::now() + Duration::from_secs(1));
        assert_eq!(overdue, vec!["soon".to_string()]);
    }
}
