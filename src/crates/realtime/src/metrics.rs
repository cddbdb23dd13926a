//! Registry metrics tracking

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the registry
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    /// Successful new subscriptions
    subscriptions: AtomicU64,
    /// Topic memberships removed (explicitly or by pruning)
    unsubscriptions: AtomicU64,
    /// Messages accepted by a connection
    messages_delivered: AtomicU64,
    /// Delivery attempts that failed
    delivery_failures: AtomicU64,
    /// Connections dropped because delivery failed
    connections_pruned: AtomicU64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsubscriptions(&self, count: u64) {
        self.unsubscriptions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, count: u64) {
        self.messages_delivered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pruned(&self) {
        self.connections_pruned.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            unsubscriptions: self.unsubscriptions.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            connections_pruned: self.connections_pruned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RegistryMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub subscriptions: u64,
    pub unsubscriptions: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
    pub connections_pruned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = RegistryMetrics::new();
        metrics.record_subscription();
        metrics.record_subscription();
        metrics.record_delivered(5);
        metrics.record_failure();
        metrics.record_pruned();
        metrics.record_unsubscriptions(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.subscriptions, 2);
        assert_eq!(snap.messages_delivered, 5);
        assert_eq!(snap.delivery_failures, 1);
        assert_eq!(snap.connections_pruned, 1);
        assert_eq!(snap.unsubscriptions, 2);
    }
}
