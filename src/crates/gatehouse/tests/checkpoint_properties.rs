//! Property tests for the checkpoint state machine

use gatehouse::checkpoint::{
    CheckpointGate, CheckpointStatus, Decision, NewCheckpoint, ResponseSubmission,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Assign(String),
    Respond(Decision, String),
    Resubmit,
    Cancel,
}

fn decision() -> impl Strategy<Value = Decision> {
    prop_oneof![
        Just(Decision::Approve),
        Just(Decision::Reject),
        Just(Decision::NeedsRevision),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,6}".prop_map(Op::Assign),
        (decision(), "[a-z]{0,12}").prop_map(|(d, f)| Op::Respond(d, f)),
        Just(Op::Resubmit),
        Just(Op::Cancel),
    ]
}

/// One gate call may take two edges when it passes through `in_review`
fn reachable(from: CheckpointStatus, to: CheckpointStatus) -> bool {
    from == to
        || from.can_transition_to(to)
        || (from.can_transition_to(CheckpointStatus::InReview)
            && CheckpointStatus::InReview.can_transition_to(to))
}

proptest! {
    #[test]
    fn test_random_operations_respect_state_machine(
        assigned in any::<bool>(),
        ops in prop::collection::vec(op(), 1..24),
    ) {
        let gate = CheckpointGate::new_default();
        let mut request = NewCheckpoint::new("wf-prop", "review", "Property review");
        if assigned {
            request = request.with_assignee("initial");
        }
        let id = gate.create(request).unwrap();

        for op in ops {
            let before = gate.get(&id).unwrap();
            let result = match op {
                Op::Assign(name) => gate.assign(&id, &name).map(|_| ()),
                Op::Respond(decision, feedback) => gate
                    .submit_response(&id, ResponseSubmission::new("reviewer", decision).with_feedback(feedback))
                    .map(|_| ()),
                Op::Resubmit => gate.resubmit(&id, serde_json::json!({"rev": before.responses.len()})).map(|_| ()),
                Op::Cancel => gate.cancel(&id, None).map(|_| ()),
            };
            let after = gate.get(&id).unwrap();

            if before.status.is_terminal() {
                prop_assert!(result.is_err());
                prop_assert_eq!(&after, &before);
                continue;
            }

            match result {
                Ok(()) => {
                    prop_assert!(
                        reachable(before.status, after.status),
                        "illegal edge {} -> {}", before.status, after.status
                    );
                }
                Err(_) => {
                    prop_assert_eq!(after.status, before.status);
                    prop_assert_eq!(after.responses.len(), before.responses.len());
                }
            }

            prop_assert!(after.responses.len() <= before.responses.len() + 1);
            prop_assert_eq!(after.resolved_at.is_some(), after.status.is_terminal());
        }
    }

    #[test]
    fn test_each_response_recorded_once(decisions in prop::collection::vec(decision(), 1..8)) {
        let gate = CheckpointGate::new_default();
        let id = gate.create(NewCheckpoint::new("wf-prop", "review", "Review")).unwrap();

        let mut accepted = 0;
        for decision in decisions {
            let status = gate.get(&id).unwrap().status;
            if status == CheckpointStatus::NeedsRevision {
                gate.resubmit(&id, serde_json::Value::Null).unwrap();
            }
            if gate.submit_response(&id, ResponseSubmission::new("r", decision)).is_ok() {
                accepted += 1;
            }
        }

        let checkpoint = gate.get(&id).unwrap();
        prop_assert_eq!(checkpoint.responses.len(), accepted);
        prop_assert_eq!(checkpoint.resolved_at.is_some(), checkpoint.status.is_terminal());
    }
}
