//! Human-in-the-loop coordination for workflow runs
//!
//! Gatehouse lets a running workflow pause on a human decision and talk to
//! people watching it live:
//!
//! - [`checkpoint`]: checkpoints and their review state machine
//! - [`approval`]: suspending a caller until a checkpoint is decided
//! - [`bridge`]: routing a run's output and input prompts to subscribers
//! - [`notify`]: fanning checkpoint lifecycle events out to handlers
//! - [`server`]: HTTP and WebSocket surface for reviewers
//!
//! Live delivery itself lives in the `realtime` crate. [`Gatehouse`] wires
//! all of it together from a [`GatehouseConfig`].

pub mod approval;
pub mod bridge;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod notify;
pub mod runtime;
pub mod server;
pub mod sync;

pub use approval::{ApprovalResult, ApprovalTicket, ApprovalWaiter};
pub use bridge::{
    BridgeSession, Emission, ExecutionBridge, FallbackReason, InputReply, IoChannel, OutputKind,
    RunOutcome,
};
pub use checkpoint::{
    Checkpoint, CheckpointGate, CheckpointResponse, CheckpointStatus, Decision, NewCheckpoint,
    Priority, ResponseSubmission,
};
pub use config::{ConfigError, GatehouseConfig};
pub use error::{BridgeError, BridgeResult, GateError, GateResult, GatehouseError};
pub use notify::{CheckpointEvent, CheckpointEventKind, NotificationFanout, NotificationHandler};
pub use runtime::Gatehouse;
