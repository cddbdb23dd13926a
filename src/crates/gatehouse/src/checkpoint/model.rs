//! Checkpoint data model
//!
//! A checkpoint is a request for a human decision that gates a workflow
//! run. Its status only ever moves along the edges accepted by
//! [`CheckpointStatus::can_transition_to`]; responses are appended and
//! never edited.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{GateError, GateResult};

/// Upper bound on a checkpoint deadline, in hours (roughly a century)
const MAX_TIMEOUT_HOURS: u64 = 24 * 365 * 100;

/// Checkpoint status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Waiting for a reviewer to pick it up
    Pending,
    /// A reviewer is assigned
    InReview,
    Approved,
    Rejected,
    /// Sent back for changes; waits for a re-submission
    NeedsRevision,
    /// Withdrawn before a decision
    Cancelled,
}

impl CheckpointStatus {
    pub const ALL: [CheckpointStatus; 6] = [
        CheckpointStatus::Pending,
        CheckpointStatus::InReview,
        CheckpointStatus::Approved,
        CheckpointStatus::Rejected,
        CheckpointStatus::NeedsRevision,
        CheckpointStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::InReview => "in_review",
            CheckpointStatus::Approved => "approved",
            CheckpointStatus::Rejected => "rejected",
            CheckpointStatus::NeedsRevision => "needs_revision",
            CheckpointStatus::Cancelled => "cancelled",
        }
    }

    /// Check if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointStatus::Approved | CheckpointStatus::Rejected | CheckpointStatus::Cancelled
        )
    }

    /// Check if the checkpoint is waiting for a decision
    pub fn is_awaiting_decision(&self) -> bool {
        matches!(self, CheckpointStatus::Pending | CheckpointStatus::InReview)
    }

    /// Check if `next` is a legal edge from this status
    pub fn can_transition_to(&self, next: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        matches!(
            (self, next),
            (Pending, InReview)
                | (Pending, Cancelled)
                | (InReview, Approved)
                | (InReview, Rejected)
                | (InReview, NeedsRevision)
                | (InReview, Cancelled)
                | (NeedsRevision, InReview)
                | (NeedsRevision, Pending)
                | (NeedsRevision, Cancelled)
        )
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    NeedsRevision,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::NeedsRevision => "needs_revision",
        }
    }

    /// Status a checkpoint lands in after this decision
    pub fn resulting_status(&self) -> CheckpointStatus {
        match self {
            Decision::Approve => CheckpointStatus::Approved,
            Decision::Reject => CheckpointStatus::Rejected,
            Decision::NeedsRevision => CheckpointStatus::NeedsRevision,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "approve" | "approved" => Ok(Decision::Approve),
            "reject" | "rejected" => Ok(Decision::Reject),
            "needs_revision" | "revise" => Ok(Decision::NeedsRevision),
            other => Err(GateError::InvalidArgument(format!(
                "unknown decision '{}'",
                other
            ))),
        }
    }
}

/// Checkpoint priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" | "urgent" => Ok(Priority::Critical),
            other => Err(GateError::InvalidArgument(format!(
                "unknown priority '{}'",
                other
            ))),
        }
    }
}

/// One reviewer response; immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub id: String,
    pub checkpoint_id: String,
    pub reviewer_id: String,
    pub decision: Decision,
    pub feedback: String,
    pub suggestions: Option<Value>,
    pub changes: Option<Value>,
    pub time_spent_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// A request for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    /// Run this checkpoint gates
    pub workflow_id: String,
    pub project_id: Option<String>,
    /// Free-form kind, e.g. "style_approval"
    pub checkpoint_type: String,
    pub title: String,
    pub description: String,
    /// Snapshot of whatever the reviewer is asked to judge
    pub content: Value,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly when the status becomes terminal
    pub resolved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Responses in submission order
    pub responses: Vec<CheckpointResponse>,
}

impl Checkpoint {
    pub(crate) fn from_request(request: NewCheckpoint, default_timeout_hours: u64) -> Self {
        let now = Utc::now();
        let hours = request
            .timeout_hours
            .unwrap_or(default_timeout_hours)
            .min(MAX_TIMEOUT_HOURS);
        let expires_at = now.checked_add_signed(ChronoDuration::hours(hours as i64));
        let status = if request.assignee.is_some() {
            CheckpointStatus::InReview
        } else {
            CheckpointStatus::Pending
        };

        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: request.workflow_id,
            project_id: request.project_id,
            checkpoint_type: request.checkpoint_type,
            title: request.title,
            description: request.description,
            content: request.content,
            assignee: request.assignee,
            priority: request.priority,
            status,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            expires_at,
            cancel_reason: None,
            responses: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the checkpoint is still open past its deadline
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Most recent response, if any
    pub fn latest_response(&self) -> Option<&CheckpointResponse> {
        self.responses.last()
    }

    /// Move to `next`, refusing edges outside the state machine
    pub(crate) fn transition(&mut self, next: CheckpointStatus) -> GateResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(GateError::invalid_state(
                &self.id,
                self.status,
                &format!("move to {}", next),
            ));
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.resolved_at = Some(now);
        }
        Ok(())
    }
}

/// Arguments for creating a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckpoint {
    pub workflow_id: String,
    pub project_id: Option<String>,
    pub checkpoint_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: Value,
    pub assignee: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Deadline in hours; the gate default applies when unset
    pub timeout_hours: Option<u64>,
}

impl NewCheckpoint {
    pub fn new(
        workflow_id: impl Into<String>,
        checkpoint_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            project_id: None,
            checkpoint_type: checkpoint_type.into(),
            title: title.into(),
            description: String::new(),
            content: Value::Null,
            assignee: None,
            priority: Priority::default(),
            timeout_hours: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_hours(mut self, hours: u64) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub(crate) fn validate(&self) -> GateResult<()> {
        if self.workflow_id.trim().is_empty() {
            return Err(GateError::InvalidArgument(
                "workflow_id must not be empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(GateError::InvalidArgument(
                "title must not be empty".to_string(),
            ));
        }
        if matches!(&self.assignee, Some(a) if a.trim().is_empty()) {
            return Err(GateError::InvalidArgument(
                "assignee must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A reviewer's answer before it is recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSubmission {
    pub reviewer_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub feedback: String,
    pub suggestions: Option<Value>,
    pub changes: Option<Value>,
    pub time_spent_secs: Option<u64>,
}

impl ResponseSubmission {
    pub fn new(reviewer_id: impl Into<String>, decision: Decision) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            decision,
            feedback: String::new(),
            suggestions: None,
            changes: None,
            time_spent_secs: None,
        }
    }

    /// Build a submission from a wire-level decision string
    pub fn parse(reviewer_id: impl Into<String>, decision: &str) -> GateResult<Self> {
        Ok(Self::new(reviewer_id, decision.parse()?))
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn with_suggestions(mut self, suggestions: Value) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    pub fn with_changes(mut self, changes: Value) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn with_time_spent(mut self, secs: u64) -> Self {
        self.time_spent_secs = Some(secs);
        self
    }

    pub(crate) fn into_response(self, checkpoint_id: &str) -> CheckpointResponse {
        CheckpointResponse {
            id: Uuid::new_v4().to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            reviewer_id: self.reviewer_id,
            decision: self.decision,
            feedback: self.feedback,
            suggestions: self.suggestions,
            changes: self.changes,
            time_spent_secs: self.time_spent_secs,
            created_at: Utc::now(),
        }
    }
}
