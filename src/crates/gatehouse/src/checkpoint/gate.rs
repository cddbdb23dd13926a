//! Checkpoint approval state machine
//!
//! Every mutation follows the same order: change the checkpoint under the
//! write lock, take a snapshot, release the lock, dispatch the lifecycle
//! event, then fire the resolution hook if one is registered. Handlers and
//! hooks therefore never run while the gate is locked and may call back
//! into it freely.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::model::{Checkpoint, CheckpointResponse, CheckpointStatus, NewCheckpoint, ResponseSubmission};
use crate::error::{GateError, GateResult};
use crate::notify::{CheckpointEvent, CheckpointEventKind, NotificationFanout};

/// Callback run once when a checkpoint receives a response or is cancelled
pub type ResolutionHook = Box<dyn FnOnce(&Checkpoint) + Send>;

/// Identifies one registered hook so stale owners cannot clear a newer one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookToken(u64);

/// The checkpoint store and state machine
pub struct CheckpointGate {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    hooks: Mutex<HashMap<String, (HookToken, ResolutionHook)>>,
    next_hook: AtomicU64,
    fanout: Arc<NotificationFanout>,
    default_timeout_hours: u64,
}

impl CheckpointGate {
    pub fn new(fanout: Arc<NotificationFanout>, default_timeout_hours: u64) -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
            hooks: Mutex::new(HashMap::new()),
            next_hook: AtomicU64::new(1),
            fanout,
            default_timeout_hours,
        }
    }

    /// Gate with its own fanout and a 24 hour default deadline
    pub fn new_default() -> Self {
        Self::new(Arc::new(NotificationFanout::new()), 24)
    }

    pub fn fanout(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    pub fn default_timeout_hours(&self) -> u64 {
        self.default_timeout_hours
    }

    /// Create a checkpoint and return its ID
    ///
    /// The checkpoint starts `pending`, or `in_review` when an assignee is
    /// given.
    pub fn create(&self, request: NewCheckpoint) -> GateResult<String> {
        request.validate()?;
        let checkpoint = Checkpoint::from_request(request, self.default_timeout_hours);
        let id = checkpoint.id.clone();

        self.checkpoints.write().insert(id.clone(), checkpoint.clone());
        info!(
            "Created checkpoint {} ({}) for workflow {}",
            id, checkpoint.checkpoint_type, checkpoint.workflow_id
        );

        self.fanout
            .dispatch(&CheckpointEvent::new(CheckpointEventKind::Created, checkpoint));
        Ok(id)
    }

    /// Assign a reviewer; a pending checkpoint moves to `in_review`
    pub fn assign(&self, id: &str, assignee: &str) -> GateResult<Checkpoint> {
        if assignee.trim().is_empty() {
            return Err(GateError::InvalidArgument(
                "assignee must not be empty".to_string(),
            ));
        }

        let snapshot = self.mutate(id, |checkpoint| {
            if checkpoint.is_terminal() {
                return Err(GateError::invalid_state(id, checkpoint.status, "assign"));
            }
            if checkpoint.status == CheckpointStatus::Pending {
                checkpoint.transition(CheckpointStatus::InReview)?;
            }
            checkpoint.assignee = Some(assignee.to_string());
            checkpoint.updated_at = Utc::now();
            Ok(())
        })?;

        info!("Assigned checkpoint {} to {}", id, assignee);
        self.fanout.dispatch(&CheckpointEvent::new(
            CheckpointEventKind::Assigned,
            snapshot.clone(),
        ));
        Ok(snapshot)
    }

    /// Record a reviewer response
    ///
    /// A checkpoint that is `pending` or `needs_revision` passes through
    /// `in_review` on the way to the decided status. Fails with
    /// [`GateError::InvalidState`] on a terminal checkpoint, leaving it
    /// untouched.
    pub fn submit_response(
        &self,
        id: &str,
        submission: ResponseSubmission,
    ) -> GateResult<CheckpointResponse> {
        if submission.reviewer_id.trim().is_empty() {
            return Err(GateError::InvalidArgument(
                "reviewer_id must not be empty".to_string(),
            ));
        }

        let mut recorded = None;
        let snapshot = self.mutate(id, |checkpoint| {
            if checkpoint.is_terminal() {
                return Err(GateError::invalid_state(
                    id,
                    checkpoint.status,
                    "submit a response",
                ));
            }
            if checkpoint.status != CheckpointStatus::InReview {
                checkpoint.transition(CheckpointStatus::InReview)?;
            }
            checkpoint.transition(submission.decision.resulting_status())?;

            let response = submission.into_response(id);
            checkpoint.responses.push(response.clone());
            recorded = Some(response);
            Ok(())
        })?;

        let response = recorded.ok_or_else(|| GateError::NotFound(id.to_string()))?;
        info!(
            "Checkpoint {} {} by {} -> {}",
            id, response.decision, response.reviewer_id, snapshot.status
        );

        self.fanout.dispatch(
            &CheckpointEvent::new(CheckpointEventKind::Responded, snapshot.clone())
                .with_response(response.clone()),
        );
        self.fire_hook(&snapshot);
        Ok(response)
    }

    /// Withdraw a checkpoint before a decision
    pub fn cancel(&self, id: &str, reason: Option<String>) -> GateResult<Checkpoint> {
        let snapshot = self.mutate(id, |checkpoint| {
            if checkpoint.is_terminal() {
                return Err(GateError::invalid_state(id, checkpoint.status, "cancel"));
            }
            checkpoint.transition(CheckpointStatus::Cancelled)?;
            checkpoint.cancel_reason = reason.clone();
            Ok(())
        })?;

        info!("Cancelled checkpoint {}", id);
        self.fanout.dispatch(
            &CheckpointEvent::new(CheckpointEventKind::Cancelled, snapshot.clone())
                .with_reason(reason),
        );
        self.fire_hook(&snapshot);
        Ok(snapshot)
    }

    /// Send a revised checkpoint back for review
    ///
    /// Only valid from `needs_revision`. Replaces the content snapshot and
    /// returns to `in_review` if a reviewer is assigned, `pending` otherwise.
    pub fn resubmit(&self, id: &str, content: Value) -> GateResult<Checkpoint> {
        let snapshot = self.mutate(id, |checkpoint| {
            if checkpoint.status != CheckpointStatus::NeedsRevision {
                return Err(GateError::invalid_state(id, checkpoint.status, "resubmit"));
            }
            let next = if checkpoint.assignee.is_some() {
                CheckpointStatus::InReview
            } else {
                CheckpointStatus::Pending
            };
            checkpoint.transition(next)?;
            checkpoint.content = content;
            Ok(())
        })?;

        info!("Resubmitted checkpoint {} ({})", id, snapshot.status);
        self.fanout.dispatch(&CheckpointEvent::new(
            CheckpointEventKind::Resubmitted,
            snapshot.clone(),
        ));
        Ok(snapshot)
    }

    pub fn get(&self, id: &str) -> GateResult<Checkpoint> {
        self.checkpoints
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| GateError::NotFound(id.to_string()))
    }

    pub fn list_by_project(&self, project_id: &str) -> Vec<Checkpoint> {
        self.list(|c| c.project_id.as_deref() == Some(project_id))
    }

    pub fn list_by_workflow(&self, workflow_id: &str) -> Vec<Checkpoint> {
        self.list(|c| c.workflow_id == workflow_id)
    }

    pub fn list_by_assignee(&self, assignee: &str) -> Vec<Checkpoint> {
        self.list(|c| c.assignee.as_deref() == Some(assignee))
    }

    /// Checkpoints waiting for a decision (`pending` or `in_review`)
    pub fn list_pending(&self) -> Vec<Checkpoint> {
        self.list(|c| c.status.is_awaiting_decision())
    }

    /// Open checkpoints whose deadline is at or before `now`
    pub fn list_overdue(&self, now: DateTime<Utc>) -> Vec<Checkpoint> {
        self.list(|c| c.is_overdue(now))
    }

    pub fn list_all(&self) -> Vec<Checkpoint> {
        self.list(|_| true)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register the single callback run on the next response or cancellation
    pub fn register_resolution_hook(&self, id: &str, hook: ResolutionHook) -> GateResult<HookToken> {
        if !self.checkpoints.read().contains_key(id) {
            return Err(GateError::NotFound(id.to_string()));
        }

        let mut hooks = self.hooks.lock();
        if hooks.contains_key(id) {
            return Err(GateError::AlreadyWaiting(id.to_string()));
        }
        let token = HookToken(self.next_hook.fetch_add(1, Ordering::Relaxed));
        hooks.insert(id.to_string(), (token, hook));
        debug!("Registered resolution hook for checkpoint {}", id);
        Ok(token)
    }

    /// Remove a hook that has not fired; returns whether one was removed
    pub fn clear_resolution_hook(&self, id: &str, token: HookToken) -> bool {
        let mut hooks = self.hooks.lock();
        match hooks.get(id) {
            Some((current, _)) if *current == token => {
                hooks.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn has_resolution_hook(&self, id: &str) -> bool {
        self.hooks.lock().contains_key(id)
    }

    fn mutate<F>(&self, id: &str, f: F) -> GateResult<Checkpoint>
    where
        F: FnOnce(&mut Checkpoint) -> GateResult<()>,
    {
        let mut checkpoints = self.checkpoints.write();
        let checkpoint = checkpoints
            .get_mut(id)
            .ok_or_else(|| GateError::NotFound(id.to_string()))?;

        // Work on a copy so a failed step leaves the stored checkpoint as it was
        let mut updated = checkpoint.clone();
        f(&mut updated)?;
        *checkpoint = updated.clone();
        Ok(updated)
    }

    fn fire_hook(&self, snapshot: &Checkpoint) {
        let hook = self.hooks.lock().remove(&snapshot.id);
        if let Some((_, hook)) = hook {
            debug!("Firing resolution hook for checkpoint {}", snapshot.id);
            hook(snapshot);
        }
    }

    fn list<P>(&self, predicate: P) -> Vec<Checkpoint>
    where
        P: Fn(&Checkpoint) -> bool,
    {
        let mut result: Vec<Checkpoint> = self
            .checkpoints
            .read()
            .values()
            .filter(|c| predicate(c))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        result
    }
}

impl Default for CheckpointGate {
    fn default() -> Self {
        Self::new_default()
    }
}
