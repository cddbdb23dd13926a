//! Composition root
//!
//! [`Gatehouse`] builds every component once, wires the realtime notifier
//! into the checkpoint fanout, and hands out shared references. There is no
//! global state: whoever owns the `Gatehouse` owns the system, and
//! [`shutdown`](Gatehouse::shutdown) tears it down.

use realtime::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, RegistryResult, RegistryStats,
    SubscribeOutcome, Topic, TopicType,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::approval::{ApprovalResult, ApprovalWaiter};
use crate::bridge::{ExecutionBridge, InputReply};
use crate::checkpoint::{CheckpointGate, CheckpointResponse, NewCheckpoint, ResponseSubmission};
use crate::config::GatehouseConfig;
use crate::error::{BridgeResult, GateResult, GatehouseError};
use crate::notify::{NotificationFanout, RealtimeNotifier};

/// The assembled gatehouse
pub struct Gatehouse {
    config: GatehouseConfig,
    registry: Arc<ConnectionRegistry>,
    fanout: Arc<NotificationFanout>,
    gate: Arc<CheckpointGate>,
    approvals: Arc<ApprovalWaiter>,
    bridge: ExecutionBridge,
}

impl Gatehouse {
    /// Build all components; must be called inside a Tokio runtime
    pub fn new(config: GatehouseConfig) -> Result<Self, GatehouseError> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Arc::new(NotificationFanout::new());
        fanout.register(Arc::new(RealtimeNotifier::new(Arc::clone(&registry))));

        let gate = Arc::new(CheckpointGate::new(
            Arc::clone(&fanout),
            config.checkpoints.default_timeout_hours,
        ));
        let approvals = Arc::new(ApprovalWaiter::new(
            Arc::clone(&gate),
            config.checkpoints.default_timeout(),
        ));
        let bridge = ExecutionBridge::new(Arc::clone(&registry), config.bridge.clone())?;

        info!(
            "Gatehouse ready (checkpoint timeout {}h, input timeout {}s, queue bound {})",
            config.checkpoints.default_timeout_hours,
            config.bridge.input_timeout_secs,
            config.realtime.outbound_queue_bound
        );

        Ok(Self {
            config,
            registry,
            fanout,
            gate,
            approvals,
            bridge,
        })
    }

    pub fn config(&self) -> &GatehouseConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn fanout(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    pub fn gate(&self) -> &Arc<CheckpointGate> {
        &self.gate
    }

    pub fn approvals(&self) -> &Arc<ApprovalWaiter> {
        &self.approvals
    }

    pub fn bridge(&self) -> &ExecutionBridge {
        &self.bridge
    }

    /// Open a checkpoint for review; returns its ID
    pub fn create_checkpoint(&self, request: NewCheckpoint) -> GateResult<String> {
        self.gate.create(request)
    }

    /// Wait for the decision on a checkpoint
    pub async fn await_approval(
        &self,
        checkpoint_id: &str,
        timeout: Option<Duration>,
    ) -> GateResult<ApprovalResult> {
        self.approvals.await_approval(checkpoint_id, timeout).await
    }

    /// Record a reviewer's answer arriving from a subscriber
    ///
    /// `decision` takes the wire spellings (`approve`, `reject`,
    /// `needs_revision` and their aliases).
    pub fn submit_checkpoint_response(
        &self,
        checkpoint_id: &str,
        reviewer_id: &str,
        decision: &str,
        feedback: &str,
    ) -> GateResult<CheckpointResponse> {
        let submission = ResponseSubmission::parse(reviewer_id, decision)?.with_feedback(feedback);
        self.gate.submit_response(checkpoint_id, submission)
    }

    /// Deliver a subscriber's answer to a run's input request
    pub fn submit_input_reply(&self, request_id: &str, answer: impl Into<String>) -> BridgeResult<()> {
        self.bridge.submit_input_reply(request_id, answer)
    }

    /// Write raw output on a run's session
    pub fn emit(&self, run_id: &str, text: &str) -> BridgeResult<()> {
        self.bridge.emit(run_id, text)
    }

    /// Block for input on a run; call from the run's own thread
    pub fn request_input(&self, run_id: &str, prompt: &str) -> BridgeResult<InputReply> {
        self.bridge.request_input(run_id, prompt)
    }

    /// Join `handle` to the topic named by `topic_type` and `topic_id`
    pub fn subscribe(
        &self,
        handle: Arc<dyn ConnectionHandle>,
        topic_type: &str,
        topic_id: &str,
        subscriber_id: &str,
    ) -> RegistryResult<SubscribeOutcome> {
        let topic = Topic::new(topic_type.parse::<TopicType>()?, topic_id);
        self.registry.subscribe(handle, topic, subscriber_id)
    }

    /// Remove a connection from every topic it joined
    pub fn unsubscribe(&self, id: ConnectionId) -> usize {
        self.registry.unsubscribe(id, None)
    }

    pub fn realtime_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Cancel sessions, release waits and drop every connection
    pub fn shutdown(&self) {
        let sessions = self.bridge.shutdown();
        let waits = self.approvals.release_all();
        let connections = self.registry.clear();
        info!(
            "Gatehouse shut down: {} session(s), {} approval wait(s), {} connection(s)",
            sessions, waits, connections
        );
    }
}
