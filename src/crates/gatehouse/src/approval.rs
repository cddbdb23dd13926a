//! Waiting for human approval
//!
//! [`ApprovalWaiter`] suspends a caller until a checkpoint receives a
//! response, is cancelled, or the wait times out. A timed-out approval is
//! treated as a rejection (`approved = false`, `timed_out = true`) and the
//! checkpoint itself stays open; the caller decides what to do next.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointGate, CheckpointStatus, HookToken, NewCheckpoint};
use crate::error::{GateError, GateResult};
use crate::sync::{PendingTable, ResolutionCell, WaitOutcome};

/// Result of waiting on a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResult {
    pub checkpoint_id: String,
    pub approved: bool,
    pub status: CheckpointStatus,
    /// No decision arrived before the deadline
    pub timed_out: bool,
    /// The wait was released (cancelled or shut down) before a decision
    pub released: bool,
    pub feedback: String,
    pub suggestions: Option<Value>,
    pub changes: Option<Value>,
    pub reviewer_id: Option<String>,
}

impl ApprovalResult {
    /// Result reflecting a checkpoint's current decision
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let response = checkpoint.latest_response();
        Self {
            checkpoint_id: checkpoint.id.clone(),
            approved: checkpoint.status == CheckpointStatus::Approved,
            status: checkpoint.status,
            timed_out: false,
            released: false,
            feedback: response.map(|r| r.feedback.clone()).unwrap_or_default(),
            suggestions: response.and_then(|r| r.suggestions.clone()),
            changes: response.and_then(|r| r.changes.clone()),
            reviewer_id: response.map(|r| r.reviewer_id.clone()),
        }
    }

    fn undecided(checkpoint_id: &str, status: CheckpointStatus) -> Self {
        Self {
            checkpoint_id: checkpoint_id.to_string(),
            approved: false,
            status,
            timed_out: false,
            released: false,
            feedback: String::new(),
            suggestions: None,
            changes: None,
            reviewer_id: None,
        }
    }

    fn timed_out(checkpoint_id: &str, status: CheckpointStatus) -> Self {
        Self {
            timed_out: true,
            ..Self::undecided(checkpoint_id, status)
        }
    }

    fn released(checkpoint_id: &str, status: CheckpointStatus) -> Self {
        Self {
            released: true,
            ..Self::undecided(checkpoint_id, status)
        }
    }
}

/// Wakes a waiter once a checkpoint has an outcome worth returning
fn settles_wait(status: CheckpointStatus) -> bool {
    status.is_terminal() || status == CheckpointStatus::NeedsRevision
}

/// Suspends callers until checkpoints resolve
pub struct ApprovalWaiter {
    gate: Arc<CheckpointGate>,
    pending: Arc<PendingTable<String, ApprovalResult>>,
    default_timeout: Duration,
}

impl ApprovalWaiter {
    pub fn new(gate: Arc<CheckpointGate>, default_timeout: Duration) -> Self {
        Self {
            gate,
            pending: Arc::new(PendingTable::new()),
            default_timeout,
        }
    }

    pub fn gate(&self) -> &Arc<CheckpointGate> {
        &self.gate
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Create a checkpoint and wait for its decision
    ///
    /// The wait uses `timeout`, else the checkpoint's own `timeout_hours`,
    /// else the waiter's default.
    pub async fn request_approval(
        &self,
        request: NewCheckpoint,
        timeout: Option<Duration>,
    ) -> GateResult<ApprovalResult> {
        let timeout = self.timeout_for(&request, timeout);
        let id = self.gate.create(request)?;
        let ticket = self.begin(&id)?;
        Ok(ticket.wait(timeout).await)
    }

    /// [`request_approval`](Self::request_approval) for workflow code on a
    /// blocking thread
    pub fn request_approval_blocking(
        &self,
        request: NewCheckpoint,
        timeout: Option<Duration>,
    ) -> GateResult<ApprovalResult> {
        let timeout = self.timeout_for(&request, timeout);
        let id = self.gate.create(request)?;
        let ticket = self.begin(&id)?;
        Ok(ticket.wait_blocking(timeout))
    }

    /// Wait for the decision on an existing checkpoint
    pub async fn await_approval(
        &self,
        checkpoint_id: &str,
        timeout: Option<Duration>,
    ) -> GateResult<ApprovalResult> {
        let ticket = self.begin(checkpoint_id)?;
        Ok(ticket.wait(timeout.unwrap_or(self.default_timeout)).await)
    }

    /// Register a wait on `checkpoint_id` without suspending yet
    ///
    /// Fails with [`GateError::AlreadyWaiting`] if another wait on the
    /// same checkpoint is outstanding. A checkpoint that already has an
    /// outcome resolves the ticket immediately.
    pub fn begin(&self, checkpoint_id: &str) -> GateResult<ApprovalTicket> {
        self.gate.get(checkpoint_id)?;

        let key = checkpoint_id.to_string();
        let cell = self
            .pending
            .register(key.clone(), self.default_timeout)
            .map_err(|_| GateError::AlreadyWaiting(key.clone()))?;

        let hook = {
            let pending = Arc::clone(&self.pending);
            let key = key.clone();
            Box::new(move |checkpoint: &Checkpoint| {
                pending.resolve(&key, ApprovalResult::from_checkpoint(checkpoint));
            })
        };
        let token = match self.gate.register_resolution_hook(checkpoint_id, hook) {
            Ok(token) => token,
            Err(e) => {
                self.pending.forget(&key, &cell);
                return Err(e);
            }
        };

        let ticket = ApprovalTicket {
            checkpoint_id: key,
            token,
            cell,
            gate: Arc::clone(&self.gate),
            pending: Arc::clone(&self.pending),
            done: false,
        };

        // A response that landed before the hook was registered
        let current = self.gate.get(checkpoint_id)?;
        if settles_wait(current.status) {
            self.pending
                .resolve(&ticket.checkpoint_id, ApprovalResult::from_checkpoint(&current));
        }

        debug!("Waiting on checkpoint {}", checkpoint_id);
        Ok(ticket)
    }

    /// Release the wait on `checkpoint_id`; returns whether one was open
    ///
    /// The waiter returns a `released` result. If the checkpoint was
    /// resolved first, the waiter still receives that resolution.
    pub fn cancel(&self, checkpoint_id: &str) -> bool {
        let released = self.pending.release(&checkpoint_id.to_string());
        if released {
            info!("Released wait on checkpoint {}", checkpoint_id);
        }
        released
    }

    /// When the outstanding wait on `checkpoint_id` gives up
    pub fn deadline(&self, checkpoint_id: &str) -> Option<Instant> {
        self.pending.deadline_of(&checkpoint_id.to_string())
    }

    pub fn is_waiting(&self, checkpoint_id: &str) -> bool {
        self.pending.contains(&checkpoint_id.to_string())
    }

    pub fn waiting_count(&self) -> usize {
        self.pending.len()
    }

    /// Release every outstanding wait
    pub fn release_all(&self) -> usize {
        let released = self.pending.drain();
        if released > 0 {
            info!("Released {} approval wait(s)", released);
        }
        released
    }

    fn timeout_for(&self, request: &NewCheckpoint, timeout: Option<Duration>) -> Duration {
        timeout
            .or_else(|| {
                request
                    .timeout_hours
                    .map(|h| Duration::from_secs(h.saturating_mul(3600)))
            })
            .unwrap_or(self.default_timeout)
    }
}

/// A registered wait on one checkpoint
///
/// Consumed by [`wait`](Self::wait), [`wait_blocking`](Self::wait_blocking)
/// or [`cancel`](Self::cancel). Dropping an unfinished ticket deregisters
/// the wait.
pub struct ApprovalTicket {
    checkpoint_id: String,
    token: HookToken,
    cell: Arc<ResolutionCell<ApprovalResult>>,
    gate: Arc<CheckpointGate>,
    pending: Arc<PendingTable<String, ApprovalResult>>,
    done: bool,
}

impl ApprovalTicket {
    pub fn checkpoint_id(&self) -> &str {
        &self.checkpoint_id
    }

    /// Suspend the current task until an outcome or `timeout`
    pub async fn wait(mut self, timeout: Duration) -> ApprovalResult {
        self.pending.restamp(&self.checkpoint_id, &self.cell, timeout);
        let outcome = self.cell.wait(timeout).await;
        self.finish(outcome)
    }

    /// Block the current thread until an outcome or `timeout`
    pub fn wait_blocking(mut self, timeout: Duration) -> ApprovalResult {
        self.pending.restamp(&self.checkpoint_id, &self.cell, timeout);
        let outcome = self.cell.wait_blocking(timeout);
        self.finish(outcome)
    }

    /// Abandon the wait
    ///
    /// Returns the result if the checkpoint was resolved before the
    /// cancellation; a resolution arriving afterwards is dropped.
    pub fn cancel(mut self) -> Option<ApprovalResult> {
        self.cleanup();
        self.cell.close()
    }

    fn finish(&mut self, outcome: WaitOutcome<ApprovalResult>) -> ApprovalResult {
        self.cleanup();
        match outcome {
            WaitOutcome::Resolved(result) => {
                info!(
                    "Checkpoint {} settled: {} (approved: {})",
                    self.checkpoint_id, result.status, result.approved
                );
                result
            }
            WaitOutcome::TimedOut => {
                warn!("Approval wait on checkpoint {} timed out", self.checkpoint_id);
                ApprovalResult::timed_out(&self.checkpoint_id, self.current_status())
            }
            WaitOutcome::Closed => {
                ApprovalResult::released(&self.checkpoint_id, self.current_status())
            }
        }
    }

    fn current_status(&self) -> CheckpointStatus {
        self.gate
            .get(&self.checkpoint_id)
            .map(|c| c.status)
            .unwrap_or(CheckpointStatus::Pending)
    }

    fn cleanup(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.gate
            .clear_resolution_hook(&self.checkpoint_id, self.token);
        self.pending.forget(&self.checkpoint_id, &self.cell);
    }
}

impl Drop for ApprovalTicket {
    fn drop(&mut self) {
        if !self.done {
            self.cleanup();
            self.cell.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Decision, Priority, ResponseSubmission};

    fn waiter() -> ApprovalWaiter {
        ApprovalWaiter::new(
            Arc::new(CheckpointGate::new_default()),
            Duration::from_secs(24 * 3600),
        )
    }

    fn style_approval() -> NewCheckpoint {
        NewCheckpoint::new("wf-1", "style_approval", "Style approval")
            .with_priority(Priority::High)
            .with_timeout_hours(1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_checkpoint_pending() {
        let waiter = waiter();
        let started = tokio::time::Instant::now();

        let result = waiter.request_approval(style_approval(), None).await.unwrap();
        assert!(!result.approved);
        assert!(result.timed_out);
        assert_eq!(result.status, CheckpointStatus::Pending);
        assert!(started.elapsed() >= Duration::from_secs(3600));

        let checkpoint = waiter.gate().get(&result.checkpoint_id).unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Pending);
        assert!(!waiter.is_waiting(&result.checkpoint_id));
    }

    #[tokio::test]
    async fn test_deadline_follows_wait_timeout() {
        let waiter = waiter();
        let id = waiter.gate().create(style_approval()).unwrap();
        let ticket = waiter.begin(&id).unwrap();
        let registered = waiter.deadline(&id).unwrap();

        let wait = tokio::spawn(ticket.wait(Duration::from_secs(3600)));
        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(deadline) = waiter.deadline(&id) {
                    if deadline < registered {
                        return deadline;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("deadline was never moved to the wait timeout");

        assert!(deadline <= Instant::now() + Duration::from_secs(3600));
        assert!(waiter.cancel(&id));
        assert!(!wait.await.unwrap().approved);
    }

    #[tokio::test]
    async fn test_resolved_before_wait() {
        let waiter = waiter();
        let id = waiter.gate().create(style_approval()).unwrap();
        waiter
            .gate()
            .submit_response(
                &id,
                ResponseSubmission::new("alice", Decision::Approve).with_feedback("ok"),
            )
            .unwrap();

        let result = waiter.await_approval(&id, None).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.feedback, "ok");
        assert_eq!(result.reviewer_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_second_wait_rejected() {
        let waiter = waiter();
        let id = waiter.gate().create(style_approval()).unwrap();

        let first = waiter.begin(&id).unwrap();
        assert_eq!(
            waiter.begin(&id).err(),
            Some(GateError::AlreadyWaiting(id.clone()))
        );

        waiter
            .gate()
            .submit_response(&id, ResponseSubmission::new("alice", Decision::Reject))
            .unwrap();
        let result = first.wait(Duration::from_secs(1)).await;
        assert!(!result.approved);
        assert!(!result.timed_out);
        assert_eq!(result.status, CheckpointStatus::Rejected);
    }

    #[test]
    fn test_cancel_after_resolution_returns_result() {
        let waiter = waiter();
        let id = waiter.gate().create(style_approval()).unwrap();
        let ticket = waiter.begin(&id).unwrap();

        waiter
            .gate()
            .submit_response(&id, ResponseSubmission::new("alice", Decision::Approve))
            .unwrap();
        let result = ticket.cancel().unwrap();
        assert!(result.approved);
    }

    #[test]
    fn test_cancel_before_resolution_drops_late_answer() {
        let waiter = waiter();
        let id = waiter.gate().create(style_approval()).unwrap();
        let ticket = waiter.begin(&id).unwrap();

        assert!(ticket.cancel().is_none());
        assert!(!waiter.is_waiting(&id));
        assert!(!waiter.gate().has_resolution_hook(&id));

        waiter
            .gate()
            .submit_response(&id, ResponseSubmission::new("alice", Decision::Approve))
            .unwrap();
        assert_eq!(waiter.gate().get(&id).unwrap().status, CheckpointStatus::Approved);
    }

    #[test]
    fn test_dropped_ticket_allows_new_wait() {
        let waiter = waiter();
        let id = waiter.gate().create(style_approval()).unwrap();
        drop(waiter.begin(&id).unwrap());
        assert!(waiter.begin(&id).is_ok());
    }

    #[test]
    fn test_blocking_wait_released_by_cancel() {
        let waiter = Arc::new(waiter());
        let id = waiter.gate().create(style_approval()).unwrap();
        let ticket = waiter.begin(&id).unwrap();

        let canceller = {
            let waiter = Arc::clone(&waiter);
            let id = id.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                waiter.cancel(&id)
            })
        };

        let result = ticket.wait_blocking(Duration::from_secs(5));
        assert!(result.released);
        assert!(!result.approved);
        assert!(canceller.join().unwrap());
    }

    #[test]
    fn test_begin_unknown_checkpoint() {
        let waiter = waiter();
        assert!(matches!(waiter.begin("nope"), Err(GateError::NotFound(_))));
        assert_eq!(waiter.waiting_count(), 0);
    }
}
