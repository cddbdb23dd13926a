//! Live event delivery for gatehouse
//!
//! Tracks subscriber connections grouped by topic and fans outbound
//! messages out to them. A connection whose transport fails during
//! delivery is pruned from every pool it belongs to; the publisher never
//! sees the failure.

pub mod error;
pub mod handle;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod topic;

pub use error::{DeliveryError, RegistryError, RegistryResult};
pub use handle::{ChannelHandle, ConnectionHandle, ConnectionId};
pub use message::{timestamp, InboundMessage, OutboundMessage};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use registry::{
    Connection, ConnectionRegistry, PoolStats, PublishReport, RegistryStats, SubscribeOutcome,
};
pub use topic::{Topic, TopicType};
