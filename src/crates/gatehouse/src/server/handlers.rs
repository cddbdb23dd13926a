//! REST handlers for reviewers and input replies

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::response;
use super::AppState;
use crate::checkpoint::{Checkpoint, ResponseSubmission};

/// Query filters for listing checkpoints; all given filters must match
#[derive(Debug, Default, Deserialize)]
pub struct CheckpointListQuery {
    pub workflow_id: Option<String>,
    pub project_id: Option<String>,
    pub assignee: Option<String>,
    /// Only checkpoints still awaiting a decision
    pub pending: Option<bool>,
}

impl CheckpointListQuery {
    fn matches(&self, checkpoint: &Checkpoint) -> bool {
        if let Some(ref workflow_id) = self.workflow_id {
            if checkpoint.workflow_id != *workflow_id {
                return false;
            }
        }
        if let Some(ref project_id) = self.project_id {
            if checkpoint.project_id.as_deref() != Some(project_id.as_str()) {
                return false;
            }
        }
        if let Some(ref assignee) = self.assignee {
            if checkpoint.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if let Some(pending) = self.pending {
            if checkpoint.status.is_awaiting_decision() != pending {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub assignee: String,
}

#[derive(Debug, Deserialize)]
pub struct ResponseRequest {
    pub reviewer_id: String,
    pub decision: String,
    #[serde(default)]
    pub feedback: String,
    pub suggestions: Option<Value>,
    pub changes: Option<Value>,
    pub time_spent_secs: Option<u64>,
}

impl ResponseRequest {
    pub(crate) fn into_submission(self) -> ApiResult<ResponseSubmission> {
        let mut submission =
            ResponseSubmission::parse(self.reviewer_id, &self.decision)?.with_feedback(self.feedback);
        if let Some(suggestions) = self.suggestions {
            submission = submission.with_suggestions(suggestions);
        }
        if let Some(changes) = self.changes {
            submission = submission.with_changes(changes);
        }
        if let Some(secs) = self.time_spent_secs {
            submission = submission.with_time_spent(secs);
        }
        Ok(submission)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InputReplyRequest {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct InputReplyAccepted {
    pub request_id: String,
    pub delivered: bool,
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    response::ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/v1/checkpoints
pub async fn list_checkpoints(
    State(state): State<AppState>,
    Query(query): Query<CheckpointListQuery>,
) -> ApiResult<impl IntoResponse> {
    let gate = state.gatehouse.gate();
    let candidates = match query.workflow_id {
        Some(ref workflow_id) => gate.list_by_workflow(workflow_id),
        None => gate.list_all(),
    };
    let checkpoints: Vec<Checkpoint> = candidates
        .into_iter()
        .filter(|c| query.matches(c))
        .collect();
    Ok(response::ok(checkpoints))
}

/// GET /api/v1/checkpoints/:id
pub async fn get_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let checkpoint = state.gatehouse.gate().get(&id)?;
    Ok(response::ok(checkpoint))
}

/// POST /api/v1/checkpoints/:id/assign
pub async fn assign_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<impl IntoResponse> {
    let checkpoint = state.gatehouse.gate().assign(&id, &req.assignee)?;
    tracing::info!("Checkpoint {} assigned to {}", id, req.assignee);
    Ok(response::ok(checkpoint))
}

/// POST /api/v1/checkpoints/:id/responses
pub async fn submit_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResponseRequest>,
) -> ApiResult<impl IntoResponse> {
    let submission = req.into_submission()?;
    let recorded = state.gatehouse.gate().submit_response(&id, submission)?;
    Ok(response::created(recorded))
}

/// POST /api/v1/checkpoints/:id/cancel
pub async fn cancel_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.and_then(|Json(req)| req.reason);
    let checkpoint = state.gatehouse.gate().cancel(&id, reason)?;
    Ok(response::ok(checkpoint))
}

/// POST /api/v1/inputs/:request_id
pub async fn submit_input(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(req): Json<InputReplyRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .gatehouse
        .submit_input_reply(&request_id, req.answer)
        .map_err(ApiError::from)?;
    Ok(response::ok(InputReplyAccepted {
        request_id,
        delivered: true,
    }))
}

/// GET /api/v1/realtime/stats
pub async fn realtime_stats(State(state): State<AppState>) -> impl IntoResponse {
    response::ok(state.gatehouse.realtime_stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStatus, Decision, NewCheckpoint};
    use chrono::Utc;

    fn sample(workflow_id: &str, assignee: Option<&str>) -> Checkpoint {
        let mut request = NewCheckpoint::new(workflow_id, "review", "Review");
        if let Some(assignee) = assignee {
            request = request.with_assignee(assignee);
        }
        Checkpoint::from_request(request, 24)
    }

    #[test]
    fn test_query_filters() {
        let checkpoint = sample("wf-1", Some("alice"));
        assert!(CheckpointListQuery::default().matches(&checkpoint));

        let by_assignee = CheckpointListQuery {
            assignee: Some("alice".to_string()),
            ..Default::default()
        };
        assert!(by_assignee.matches(&checkpoint));

        let other_workflow = CheckpointListQuery {
            workflow_id: Some("wf-2".to_string()),
            ..Default::default()
        };
        assert!(!other_workflow.matches(&checkpoint));

        let resolved_only = CheckpointListQuery {
            pending: Some(false),
            ..Default::default()
        };
        assert!(!resolved_only.matches(&checkpoint));
    }

    #[test]
    fn test_pending_filter_excludes_terminal() {
        let mut checkpoint = sample("wf-1", None);
        checkpoint.status = CheckpointStatus::Approved;
        checkpoint.resolved_at = Some(Utc::now());

        let pending = CheckpointListQuery {
            pending: Some(true),
            ..Default::default()
        };
        assert!(!pending.matches(&checkpoint));
    }

    #[test]
    fn test_response_request_conversion() {
        let req = ResponseRequest {
            reviewer_id: "bob".to_string(),
            decision: "needs-revision".to_string(),
            feedback: "tighten chapter 2".to_string(),
            suggestions: Some(json!(["cut the prologue"])),
            changes: None,
            time_spent_secs: Some(90),
        };
        let submission = req.into_submission().unwrap();
        assert_eq!(submission.decision, Decision::NeedsRevision);
        assert_eq!(submission.time_spent_secs, Some(90));

        let bad = ResponseRequest {
            reviewer_id: "bob".to_string(),
            decision: "perhaps".to_string(),
            feedback: String::new(),
            suggestions: None,
            changes: None,
            time_spent_secs: None,
        };
        assert!(matches!(bad.into_submission(), Err(ApiError::ValidationError(_))));
    }
}
