//! Topic-grouped connection registry
//!
//! Connections are indexed three ways: by topic (the pools messages are
//! published to), by connection ID (which topics a handle joined), and by
//! subscriber ID. Every mutation takes the connection's index entry first,
//! then the subscriber entry, then the pool entry; publishing only touches
//! pools and never holds a pool lock while delivering.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::handle::{ConnectionHandle, ConnectionId};
use crate::message::{timestamp, OutboundMessage};
use crate::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::topic::{Topic, TopicType};

/// One handle's membership in one pool
#[derive(Debug, Clone)]
struct PoolMember {
    handle: Arc<dyn ConnectionHandle>,
    subscriber_id: String,
    connected_at: DateTime<Utc>,
}

/// Index entry for a live handle
#[derive(Debug)]
struct ConnectionEntry {
    subscriber_id: String,
    topics: HashSet<Topic>,
}

/// Public view of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub subscriber_id: String,
    pub topic: Topic,
    pub connected_at: DateTime<Utc>,
}

/// Result of a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Handle joined the pool
    Subscribed,
    /// Handle was already in the pool; nothing changed
    AlreadySubscribed,
    /// Handle joined but failed the greeting and was pruned again
    Dropped,
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Connections that accepted the message
    pub delivered: usize,
    /// Connections removed because delivery failed
    pub pruned: usize,
}

/// Size of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub topic_type: TopicType,
    pub topic_id: String,
    pub connections: usize,
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// One entry per non-empty pool, sorted by topic
    pub pools: Vec<PoolStats>,
    /// Distinct live handles
    pub total_connections: usize,
    /// Distinct subscribers with at least one live handle
    pub total_subscribers: usize,
    pub metrics: MetricsSnapshot,
}

impl RegistryStats {
    /// Size of the pool for `topic`, zero when no such pool exists
    pub fn pool_size(&self, topic: &Topic) -> usize {
        self.pools
            .iter()
            .find(|p| p.topic_type == topic.topic_type && p.topic_id == topic.topic_id)
            .map(|p| p.connections)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Removal {
    topics: usize,
    connection_removed: bool,
}

/// Registry of live subscriber connections grouped by topic
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Handles per topic; a pool exists only while it has members
    pools: DashMap<Topic, HashMap<ConnectionId, PoolMember>>,
    /// Topics joined per handle
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Handles per subscriber
    subscribers: DashMap<String, HashSet<ConnectionId>>,
    metrics: RegistryMetrics,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` in the pool for `topic`
    ///
    /// Registering the same handle for the same topic twice is a no-op. A
    /// handle belongs to exactly one subscriber; presenting it under a
    /// different subscriber ID fails with
    /// [`RegistryError::SubscriberConflict`]. Newly subscribed handles are
    /// greeted with a `connection_established` message, which always
    /// precedes anything published to the topic.
    pub fn subscribe(
        &self,
        handle: Arc<dyn ConnectionHandle>,
        topic: Topic,
        subscriber_id: &str,
    ) -> RegistryResult<SubscribeOutcome> {
        if subscriber_id.trim().is_empty() {
            return Err(RegistryError::InvalidSubscription(
                "subscriber_id must not be empty".to_string(),
            ));
        }
        if topic.topic_id.trim().is_empty() {
            return Err(RegistryError::InvalidSubscription(
                "topic_id must not be empty".to_string(),
            ));
        }

        let id = handle.id();
        {
            let mut entry = match self.connections.entry(id) {
                Entry::Occupied(occupied) => {
                    if occupied.get().subscriber_id != subscriber_id {
                        return Err(RegistryError::SubscriberConflict {
                            connection: id,
                            existing: occupied.get().subscriber_id.clone(),
                            requested: subscriber_id.to_string(),
                        });
                    }
                    occupied.into_ref()
                }
                Entry::Vacant(vacant) => {
                    self.subscribers
                        .entry(subscriber_id.to_string())
                        .or_default()
                        .insert(id);
                    vacant.insert(ConnectionEntry {
                        subscriber_id: subscriber_id.to_string(),
                        topics: HashSet::new(),
                    })
                }
            };

            if entry.topics.contains(&topic) {
                debug!("Connection {} already subscribed to {}", id, topic);
                return Ok(SubscribeOutcome::AlreadySubscribed);
            }

            // Greet before joining the pool so no publish can overtake it
            let greeting = OutboundMessage::ConnectionEstablished {
                subscriber_id: subscriber_id.to_string(),
                topic_type: topic.topic_type,
                topic_id: topic.topic_id.clone(),
                timestamp: timestamp(),
            };
            if let Err(e) = handle.deliver(&greeting) {
                drop(entry);
                warn!("Greeting to {} failed ({}), dropping connection", id, e);
                self.metrics.record_failure();
                if self.drop_connection(id) {
                    self.metrics.record_pruned();
                }
                return Ok(SubscribeOutcome::Dropped);
            }
            self.metrics.record_delivered(1);

            entry.topics.insert(topic.clone());
            self.pools.entry(topic.clone()).or_default().insert(
                id,
                PoolMember {
                    handle: Arc::clone(&handle),
                    subscriber_id: subscriber_id.to_string(),
                    connected_at: Utc::now(),
                },
            );
        }

        self.metrics.record_subscription();
        info!("Subscriber {} joined {} via {}", subscriber_id, topic, id);
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Remove a handle from one pool, or from every pool when `topic` is `None`
    ///
    /// Returns the number of pools the handle left. Pools left empty are
    /// deleted, and a handle with no remaining topics leaves the
    /// subscriber index.
    pub fn unsubscribe(&self, id: ConnectionId, topic: Option<&Topic>) -> usize {
        let removal = self.remove_memberships(id, topic);
        if removal.topics > 0 {
            info!("Connection {} left {} topic(s)", id, removal.topics);
        }
        removal.topics
    }

    /// Remove a handle from every pool; returns whether it was registered
    pub fn drop_connection(&self, id: ConnectionId) -> bool {
        self.remove_memberships(id, None).connection_removed
    }

    fn remove_memberships(&self, id: ConnectionId, topic: Option<&Topic>) -> Removal {
        let Entry::Occupied(mut entry) = self.connections.entry(id) else {
            return Removal::default();
        };

        let left: Vec<Topic> = match topic {
            Some(topic) => {
                if entry.get_mut().topics.remove(topic) {
                    vec![topic.clone()]
                } else {
                    Vec::new()
                }
            }
            None => entry.get_mut().topics.drain().collect(),
        };

        for topic in &left {
            if let Entry::Occupied(mut pool) = self.pools.entry(topic.clone()) {
                pool.get_mut().remove(&id);
                if pool.get().is_empty() {
                    pool.remove();
                    debug!("Pool {} is empty, removed", topic);
                }
            }
        }

        let mut removal = Removal {
            topics: left.len(),
            connection_removed: false,
        };

        if entry.get().topics.is_empty() {
            let gone = entry.remove();
            if let Entry::Occupied(mut handles) = self.subscribers.entry(gone.subscriber_id) {
                handles.get_mut().remove(&id);
                if handles.get().is_empty() {
                    handles.remove();
                }
            }
            removal.connection_removed = true;
        }

        self.metrics.record_unsubscriptions(removal.topics as u64);
        removal
    }

    /// Deliver `message` to every handle in the pool for `topic`
    ///
    /// Handles that fail delivery are unsubscribed from everything; the
    /// remaining handles still receive the message.
    pub fn publish(&self, topic: &Topic, message: &OutboundMessage) -> PublishReport {
        let members: Vec<(ConnectionId, Arc<dyn ConnectionHandle>)> = match self.pools.get(topic) {
            Some(pool) => pool
                .iter()
                .map(|(id, member)| (*id, Arc::clone(&member.handle)))
                .collect(),
            None => {
                debug!("No subscribers on {} for {}", topic, message.event_type());
                return PublishReport::default();
            }
        };

        self.deliver_to(members, message)
    }

    /// Deliver `message` to every pool, once per handle
    pub fn broadcast_all(&self, message: &OutboundMessage) -> PublishReport {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for pool in self.pools.iter() {
            for (id, member) in pool.value() {
                if seen.insert(*id) {
                    members.push((*id, Arc::clone(&member.handle)));
                }
            }
        }

        self.deliver_to(members, message)
    }

    fn deliver_to(
        &self,
        members: Vec<(ConnectionId, Arc<dyn ConnectionHandle>)>,
        message: &OutboundMessage,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        for (id, handle) in members {
            match handle.deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    self.metrics.record_failure();
                    warn!(
                        "Delivery of {} to {} failed: {}",
                        message.event_type(),
                        id,
                        e
                    );
                    failed.push(id);
                }
            }
        }

        for id in failed {
            if self.drop_connection(id) {
                report.pruned += 1;
                self.metrics.record_pruned();
                info!("Pruned dead connection {}", id);
            }
        }

        self.metrics.record_delivered(report.delivered as u64);
        report
    }

    /// Number of handles in the pool for `topic`
    pub fn pool_size(&self, topic: &Topic) -> usize {
        self.pools.get(topic).map(|pool| pool.len()).unwrap_or(0)
    }

    /// Check if a pool exists for `topic`
    pub fn has_pool(&self, topic: &Topic) -> bool {
        self.pools.contains_key(topic)
    }

    /// Check if a handle is registered anywhere
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Check if a handle is in the pool for `topic`
    pub fn is_subscribed(&self, id: ConnectionId, topic: &Topic) -> bool {
        self.connections
            .get(&id)
            .map(|entry| entry.topics.contains(topic))
            .unwrap_or(false)
    }

    /// Topics a handle has joined
    pub fn topics_of(&self, id: ConnectionId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .connections
            .get(&id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Subscriptions held by one subscriber across all of its handles
    pub fn connections_of(&self, subscriber_id: &str) -> Vec<Connection> {
        let ids: Vec<ConnectionId> = self
            .subscribers
            .get(subscriber_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let mut result = Vec::new();
        for id in ids {
            for topic in self.topics_of(id) {
                let connected_at = self
                    .pools
                    .get(&topic)
                    .and_then(|pool| pool.get(&id).map(|m| m.connected_at));
                if let Some(connected_at) = connected_at {
                    result.push(Connection {
                        id,
                        subscriber_id: subscriber_id.to_string(),
                        topic,
                        connected_at,
                    });
                }
            }
        }
        result
    }

    /// Subscriber owning a handle
    pub fn subscriber_of(&self, id: ConnectionId) -> Option<String> {
        self.connections.get(&id).map(|entry| entry.subscriber_id.clone())
    }

    /// Pool sizes and counters
    pub fn stats(&self) -> RegistryStats {
        let mut pools: Vec<PoolStats> = self
            .pools
            .iter()
            .map(|pool| PoolStats {
                topic_type: pool.key().topic_type,
                topic_id: pool.key().topic_id.clone(),
                connections: pool.value().len(),
            })
            .collect();
        pools.sort_by(|a, b| {
            (a.topic_type, &a.topic_id).cmp(&(b.topic_type, &b.topic_id))
        });

        RegistryStats {
            pools,
            total_connections: self.connections.len(),
            total_subscribers: self.subscribers.len(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Subscriber IDs in one pool
    pub fn subscribers_of(&self, topic: &Topic) -> Vec<String> {
        let mut ids: Vec<String> = self
            .pools
            .get(topic)
            .map(|pool| pool.values().map(|m| m.subscriber_id.clone()).collect())
            .unwrap_or_default();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Drop every connection; returns how many were removed
    pub fn clear(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        let removed = ids
            .into_iter()
            .filter(|id| self.drop_connection(*id))
            .count();
        info!("Registry cleared, {} connection(s) dropped", removed);
        removed
    }
}
