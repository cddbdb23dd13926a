//! End-to-end approval scenarios through the public API

use gatehouse::checkpoint::{
    CheckpointStatus, Decision, NewCheckpoint, Priority, ResponseSubmission,
};
use gatehouse::notify::CheckpointEventKind;
use gatehouse::{GateError, Gatehouse, GatehouseConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn gatehouse() -> Gatehouse {
    Gatehouse::new(GatehouseConfig::default()).unwrap()
}

async fn wait_until_waiting(gatehouse: &Gatehouse, id: &str) {
    for _ in 0..100 {
        if gatehouse.approvals().is_waiting(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no wait registered on {}", id);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_checkpoint_times_out_as_rejection() {
    let gatehouse = gatehouse();
    let request = NewCheckpoint::new("wf-1", "style_approval", "Style approval")
        .with_priority(Priority::High)
        .with_timeout_hours(1);

    let started = tokio::time::Instant::now();
    let result = gatehouse
        .approvals()
        .request_approval(request, None)
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(3600));
    assert!(!result.approved);
    assert!(result.timed_out);
    assert_eq!(result.status, CheckpointStatus::Pending);
    assert_eq!(gatehouse.approvals().waiting_count(), 0);

    // A late response resolves the checkpoint but not the returned result
    gatehouse
        .submit_checkpoint_response(&result.checkpoint_id, "alice", "approve", "too late")
        .unwrap();
    assert!(!result.approved);
    assert_eq!(
        gatehouse.gate().get(&result.checkpoint_id).unwrap().status,
        CheckpointStatus::Approved
    );
}

#[tokio::test]
async fn test_approval_wakes_waiter_with_feedback() {
    let gatehouse = gatehouse();
    let id = gatehouse
        .create_checkpoint(NewCheckpoint::new("wf-1", "outline", "Outline review"))
        .unwrap();

    let ticket = gatehouse.approvals().begin(&id).unwrap();
    let waiter = tokio::spawn(ticket.wait(Duration::from_secs(60)));

    gatehouse
        .submit_checkpoint_response(&id, "alice", "approve", "ok")
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap();
    assert!(result.approved);
    assert!(!result.timed_out);
    assert_eq!(result.feedback, "ok");
    assert_eq!(result.reviewer_id.as_deref(), Some("alice"));
    assert_eq!(result.status, CheckpointStatus::Approved);
}

#[tokio::test]
async fn test_second_wait_rejected_first_unaffected() {
    let gatehouse = Arc::new(gatehouse());
    let id = gatehouse
        .create_checkpoint(NewCheckpoint::new("wf-1", "review", "Review"))
        .unwrap();

    let first = {
        let gatehouse = Arc::clone(&gatehouse);
        let id = id.clone();
        tokio::spawn(async move { gatehouse.await_approval(&id, Some(Duration::from_secs(30))).await })
    };
    wait_until_waiting(&gatehouse, &id).await;

    let second = gatehouse
        .await_approval(&id, Some(Duration::from_secs(30)))
        .await;
    assert!(matches!(second, Err(GateError::AlreadyWaiting(_))));

    gatehouse
        .submit_checkpoint_response(&id, "bob", "reject", "off brief")
        .unwrap();
    let result = first.await.unwrap().unwrap();
    assert!(!result.approved);
    assert_eq!(result.status, CheckpointStatus::Rejected);
    assert_eq!(result.feedback, "off brief");
}

#[tokio::test]
async fn test_cancel_wakes_waiter() {
    let gatehouse = gatehouse();
    let id = gatehouse
        .create_checkpoint(NewCheckpoint::new("wf-2", "budget", "Budget sign-off"))
        .unwrap();
    let ticket = gatehouse.approvals().begin(&id).unwrap();

    gatehouse
        .gate()
        .cancel(&id, Some("run aborted".to_string()))
        .unwrap();

    let result = ticket.wait(Duration::from_secs(5)).await;
    assert!(!result.approved);
    assert!(!result.timed_out);
    assert_eq!(result.status, CheckpointStatus::Cancelled);
}

#[tokio::test]
async fn test_revision_cycle() {
    let gatehouse = gatehouse();
    let id = gatehouse
        .create_checkpoint(
            NewCheckpoint::new("wf-3", "draft", "Chapter draft").with_assignee("carol"),
        )
        .unwrap();

    let ticket = gatehouse.approvals().begin(&id).unwrap();
    gatehouse
        .gate()
        .submit_response(
            &id,
            ResponseSubmission::new("carol", Decision::NeedsRevision)
                .with_feedback("shorter please")
                .with_suggestions(serde_json::json!(["drop the flashback"])),
        )
        .unwrap();
    let result = ticket.wait(Duration::from_secs(5)).await;
    assert!(!result.approved);
    assert_eq!(result.status, CheckpointStatus::NeedsRevision);
    assert_eq!(
        result.suggestions,
        Some(serde_json::json!(["drop the flashback"]))
    );

    let resubmitted = gatehouse
        .gate()
        .resubmit(&id, serde_json::json!({"words": 1800}))
        .unwrap();
    assert_eq!(resubmitted.status, CheckpointStatus::InReview);

    let ticket = gatehouse.approvals().begin(&id).unwrap();
    gatehouse
        .submit_checkpoint_response(&id, "carol", "approve", "")
        .unwrap();
    let result = ticket.wait(Duration::from_secs(5)).await;
    assert!(result.approved);

    let checkpoint = gatehouse.gate().get(&id).unwrap();
    assert_eq!(checkpoint.responses.len(), 2);
    assert!(checkpoint.resolved_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_request_from_workflow_thread() {
    let gatehouse = Arc::new(gatehouse());

    let workflow = {
        let gatehouse = Arc::clone(&gatehouse);
        tokio::task::spawn_blocking(move || {
            gatehouse.approvals().request_approval_blocking(
                NewCheckpoint::new("wf-4", "publish", "Publish?"),
                Some(Duration::from_secs(10)),
            )
        })
    };

    let id = loop {
        if let Some(checkpoint) = gatehouse.gate().list_by_workflow("wf-4").pop() {
            if gatehouse.approvals().is_waiting(&checkpoint.id) {
                break checkpoint.id;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    gatehouse
        .submit_checkpoint_response(&id, "dana", "approved", "ship it")
        .unwrap();
    let result = workflow.await.unwrap().unwrap();
    assert!(result.approved);
    assert_eq!(result.feedback, "ship it");
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let gatehouse = gatehouse();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        gatehouse.fanout().register_fn("recorder", move |event| {
            seen.lock().push(event.kind);
            Ok(())
        });
    }
    gatehouse.fanout().register_fn("broken", |_| anyhow::bail!("mail server down"));

    let id = gatehouse
        .create_checkpoint(NewCheckpoint::new("wf-5", "review", "Review"))
        .unwrap();
    gatehouse.gate().assign(&id, "erin").unwrap();
    gatehouse
        .submit_checkpoint_response(&id, "erin", "approve", "")
        .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            CheckpointEventKind::Created,
            CheckpointEventKind::Assigned,
            CheckpointEventKind::Responded,
        ]
    );
    assert_eq!(gatehouse.fanout().failures(), 3);
}

#[tokio::test]
async fn test_response_on_terminal_checkpoint_rejected() {
    let gatehouse = gatehouse();
    let id = gatehouse
        .create_checkpoint(NewCheckpoint::new("wf-6", "review", "Review"))
        .unwrap();
    gatehouse
        .submit_checkpoint_response(&id, "finn", "reject", "no")
        .unwrap();

    let before = gatehouse.gate().get(&id).unwrap();
    let err = gatehouse
        .submit_checkpoint_response(&id, "finn", "approve", "changed my mind")
        .unwrap_err();
    assert!(matches!(err, GateError::InvalidState { .. }));

    let after = gatehouse.gate().get(&id).unwrap();
    assert_eq!(after.status, before.status);
    assert_eq!(after.responses, before.responses);
}
