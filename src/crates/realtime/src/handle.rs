//! Connection handles
//!
//! A handle is the registry's only view of a transport. Delivery is
//! non-blocking: a handle either accepts the message into its bounded
//! outbound queue or reports why it cannot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::message::OutboundMessage;

/// Opaque identity of one transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live subscriber connection
pub trait ConnectionHandle: Send + Sync + fmt::Debug {
    /// Stable identity of this connection
    fn id(&self) -> ConnectionId;

    /// Hand one message to the transport without blocking
    fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

/// Handle backed by a bounded channel
///
/// The transport task owns the receiving half and writes whatever it
/// drains to the wire. When that task stops (socket closed) the channel
/// closes and the next delivery fails with [`DeliveryError::Closed`]; when
/// it falls `bound` messages behind, delivery fails with
/// [`DeliveryError::QueueFull`] and the registry drops the connection.
#[derive(Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
    bound: usize,
    delivered: Arc<AtomicU64>,
}

impl ChannelHandle {
    /// Create a handle and the receiver its transport task drains
    pub fn new(bound: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let bound = bound.max(1);
        let (tx, rx) = mpsc::channel(bound);
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            bound,
            delivered: Arc::new(AtomicU64::new(0)),
        };
        (handle, rx)
    }

    /// Queue bound this handle was created with
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Messages accepted so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Check whether the transport side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("bound", &self.bound)
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl ConnectionHandle for ChannelHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        match self.tx.try_send(message.clone()) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(DeliveryError::QueueFull { bound: self.bound }),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> OutboundMessage {
        OutboundMessage::error("ping", None)
    }

    #[test]
    fn test_deliver_and_receive() {
        let (handle, mut rx) = ChannelHandle::new(4);
        handle.deliver(&ping()).unwrap();
        assert_eq!(handle.delivered(), 1);
        assert_eq!(rx.try_recv().unwrap(), ping());
    }

    #[test]
    fn test_queue_bound() {
        let (handle, _rx) = ChannelHandle::new(2);
        handle.deliver(&ping()).unwrap();
        handle.deliver(&ping()).unwrap();
        assert_eq!(
            handle.deliver(&ping()),
            Err(DeliveryError::QueueFull { bound: 2 })
        );
    }

    #[test]
    fn test_closed_transport() {
        let (handle, rx) = ChannelHandle::new(2);
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.deliver(&ping()), Err(DeliveryError::Closed));
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = ChannelHandle::new(1);
        let (b, _rb) = ChannelHandle::new(1);
        assert_ne!(a.id(), b.id());
    }
}
