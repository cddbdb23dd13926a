//! Registry and delivery error types

use thiserror::Error;

use crate::handle::ConnectionId;

/// Errors returned by registry operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A handle is already owned by a different subscriber
    #[error("Connection {connection} belongs to subscriber {existing}, not {requested}")]
    SubscriberConflict {
        connection: ConnectionId,
        existing: String,
        requested: String,
    },

    /// Unknown topic type on an inbound request
    #[error("Invalid topic type: {0}")]
    InvalidTopicType(String),

    /// Subscription request missing a required field
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
}

/// Failure to hand a message to one connection
///
/// Delivery failures never reach the publisher: the registry prunes the
/// failing connection and keeps going.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Transport side of the connection has gone away
    #[error("Connection closed")]
    Closed,

    /// Outbound queue is at its bound; the subscriber is too slow
    #[error("Outbound queue full ({bound} messages)")]
    QueueFull { bound: usize },
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DeliveryError::QueueFull { bound: 8 };
        assert!(err.to_string().contains("8 messages"));
    }
}
