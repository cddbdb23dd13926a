//! Notification handler that publishes checkpoint events to subscribers

use anyhow::anyhow;
use realtime::{timestamp, ConnectionRegistry, OutboundMessage, Topic};
use std::sync::Arc;
use tracing::debug;

use super::{CheckpointEvent, CheckpointEventKind, NotificationHandler};
use crate::checkpoint::Checkpoint;

/// Forwards checkpoint events to the workflow topic of the checkpoint,
/// and to the assignee's user topic when someone is assigned
pub struct RealtimeNotifier {
    registry: Arc<ConnectionRegistry>,
}

impl RealtimeNotifier {
    pub const NAME: &'static str = "realtime";

    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    fn required(checkpoint: &Checkpoint) -> OutboundMessage {
        OutboundMessage::CheckpointRequired {
            checkpoint_id: checkpoint.id.clone(),
            workflow_id: checkpoint.workflow_id.clone(),
            checkpoint_type: checkpoint.checkpoint_type.clone(),
            title: checkpoint.title.clone(),
            description: checkpoint.description.clone(),
            priority: checkpoint.priority.to_string(),
            assignee: checkpoint.assignee.clone(),
            expires_at: checkpoint.expires_at.map(|at| at.to_rfc3339()),
            timestamp: timestamp(),
        }
    }

    /// Outbound message for an event plus whether the assignee's feed gets it too
    fn to_message(event: &CheckpointEvent) -> anyhow::Result<(OutboundMessage, bool)> {
        let checkpoint = &event.checkpoint;
        let message = match event.kind {
            CheckpointEventKind::Created | CheckpointEventKind::Resubmitted => {
                (Self::required(checkpoint), true)
            }
            CheckpointEventKind::Assigned => {
                let assignee = checkpoint
                    .assignee
                    .clone()
                    .ok_or_else(|| anyhow!("assigned event without an assignee"))?;
                let message = OutboundMessage::CheckpointAssigned {
                    checkpoint_id: checkpoint.id.clone(),
                    workflow_id: checkpoint.workflow_id.clone(),
                    assignee,
                    timestamp: timestamp(),
                };
                (message, true)
            }
            CheckpointEventKind::Responded => {
                let response = event
                    .response
                    .as_ref()
                    .ok_or_else(|| anyhow!("responded event without a response"))?;
                let message = OutboundMessage::CheckpointResolved {
                    checkpoint_id: checkpoint.id.clone(),
                    workflow_id: checkpoint.workflow_id.clone(),
                    decision: response.decision.to_string(),
                    status: checkpoint.status.to_string(),
                    feedback: response.feedback.clone(),
                    timestamp: timestamp(),
                };
                (message, false)
            }
            CheckpointEventKind::Cancelled => {
                let message = OutboundMessage::CheckpointCancelled {
                    checkpoint_id: checkpoint.id.clone(),
                    workflow_id: checkpoint.workflow_id.clone(),
                    reason: event.reason.clone(),
                    timestamp: timestamp(),
                };
                (message, false)
            }
        };
        Ok(message)
    }
}

impl NotificationHandler for RealtimeNotifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle(&self, event: &CheckpointEvent) -> anyhow::Result<()> {
        let (message, to_assignee) = Self::to_message(event)?;
        let checkpoint = &event.checkpoint;

        let report = self
            .registry
            .publish(&Topic::workflow(checkpoint.workflow_id.as_str()), &message);
        debug!(
            "Published {} for checkpoint {} to {} subscriber(s)",
            message.event_type(),
            checkpoint.id,
            report.delivered
        );

        if to_assignee {
            if let Some(assignee) = &checkpoint.assignee {
                self.registry.publish(&Topic::user(assignee.as_str()), &message);
            }
        }
        Ok(())
    }
}
