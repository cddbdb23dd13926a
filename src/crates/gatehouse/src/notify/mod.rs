//! Checkpoint lifecycle notifications
//!
//! [`NotificationFanout`] is the only way the checkpoint state machine
//! talks to the outside world. Handlers are invoked synchronously, one
//! after another; an error or panic in one handler is logged and does not
//! reach the other handlers or the gate call that triggered dispatch.

pub mod realtime;

use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::checkpoint::{Checkpoint, CheckpointResponse};

pub use self::realtime::RealtimeNotifier;

/// What happened to a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointEventKind {
    Created,
    Assigned,
    Responded,
    Resubmitted,
    Cancelled,
}

impl CheckpointEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointEventKind::Created => "created",
            CheckpointEventKind::Assigned => "assigned",
            CheckpointEventKind::Responded => "responded",
            CheckpointEventKind::Resubmitted => "resubmitted",
            CheckpointEventKind::Cancelled => "cancelled",
        }
    }
}

/// A lifecycle event with the checkpoint as it was right after the change
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointEvent {
    pub kind: CheckpointEventKind,
    pub checkpoint: Checkpoint,
    /// The response that caused a `Responded` event
    pub response: Option<CheckpointResponse>,
    /// Reason given for a cancellation
    pub reason: Option<String>,
}

impl CheckpointEvent {
    pub fn new(kind: CheckpointEventKind, checkpoint: Checkpoint) -> Self {
        Self {
            kind,
            checkpoint,
            response: None,
            reason: None,
        }
    }

    pub fn with_response(mut self, response: CheckpointResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// Receiver of checkpoint lifecycle events
pub trait NotificationHandler: Send + Sync {
    /// Name used in logs and for unregistering
    fn name(&self) -> &str;

    /// React to one event; errors are logged by the fanout
    fn handle(&self, event: &CheckpointEvent) -> anyhow::Result<()>;
}

struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> NotificationHandler for FnHandler<F>
where
    F: Fn(&CheckpointEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &CheckpointEvent) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: usize,
    pub failed: usize,
}

/// Synchronous, per-handler isolated event dispatcher
#[derive(Default)]
pub struct NotificationFanout {
    handlers: RwLock<Vec<Arc<dyn NotificationHandler>>>,
    dispatched: AtomicU64,
    failures: AtomicU64,
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; it sees every event dispatched after this call
    pub fn register(&self, handler: Arc<dyn NotificationHandler>) {
        debug!("Registered notification handler: {}", handler.name());
        self.handlers.write().push(handler);
    }

    /// Add a closure as a handler
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&CheckpointEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnHandler {
            name: name.into(),
            f,
        }));
    }

    /// Remove every handler registered under `name`
    pub fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|h| h.name() != name);
        handlers.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Run every handler on `event`
    pub fn dispatch(&self, event: &CheckpointEvent) -> DispatchReport {
        let handlers: Vec<Arc<dyn NotificationHandler>> = self.handlers.read().clone();
        let mut report = DispatchReport::default();

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => report.handled += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        "Notification handler {} failed on {} for checkpoint {}: {:#}",
                        handler.name(),
                        event.kind.as_str(),
                        event.checkpoint.id,
                        e
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        "Notification handler {} panicked on {} for checkpoint {}",
                        handler.name(),
                        event.kind.as_str(),
                        event.checkpoint.id
                    );
                }
            }
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }

    /// Events dispatched so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Handler failures so far
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
