//! Wire message shapes for subscribers
//!
//! Outbound messages are tagged by `type` in snake case so a browser client
//! can switch on `msg.type` directly.

use serde::{Deserialize, Serialize};

use crate::topic::TopicType;

/// Current time as an RFC 3339 string, the timestamp format of every message
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Messages sent from the core to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A checkpoint is waiting for a reviewer
    CheckpointRequired {
        checkpoint_id: String,
        workflow_id: String,
        checkpoint_type: String,
        title: String,
        description: String,
        priority: String,
        assignee: Option<String>,
        expires_at: Option<String>,
        timestamp: String,
    },

    /// A reviewer was assigned to a checkpoint
    CheckpointAssigned {
        checkpoint_id: String,
        workflow_id: String,
        assignee: String,
        timestamp: String,
    },

    /// A reviewer answered a checkpoint
    CheckpointResolved {
        checkpoint_id: String,
        workflow_id: String,
        decision: String,
        status: String,
        feedback: String,
        timestamp: String,
    },

    /// A checkpoint was withdrawn before a decision
    CheckpointCancelled {
        checkpoint_id: String,
        workflow_id: String,
        reason: Option<String>,
        timestamp: String,
    },

    /// One line of run output
    Output {
        run_id: String,
        text: String,
        sequence: u64,
        kind: String,
        role: Option<String>,
        stage: Option<String>,
        timestamp: String,
    },

    /// The run is blocked until someone answers `prompt`
    InputRequired {
        run_id: String,
        request_id: String,
        prompt: String,
        sequence: u64,
        timestamp: String,
    },

    /// A pending input prompt no longer accepts answers
    InputWithdrawn {
        run_id: String,
        request_id: String,
        reason: String,
        sequence: u64,
        timestamp: String,
    },

    /// The run's bridge session ended
    RunFinished {
        run_id: String,
        outcome: String,
        sequence: u64,
        timestamp: String,
    },

    /// Greeting sent to a connection right after it subscribes
    ConnectionEstablished {
        subscriber_id: String,
        topic_type: TopicType,
        topic_id: String,
        timestamp: String,
    },

    /// Problem with something the subscriber sent
    Error {
        message: String,
        code: Option<String>,
    },
}

impl OutboundMessage {
    /// Get event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboundMessage::CheckpointRequired { .. } => "checkpoint_required",
            OutboundMessage::CheckpointAssigned { .. } => "checkpoint_assigned",
            OutboundMessage::CheckpointResolved { .. } => "checkpoint_resolved",
            OutboundMessage::CheckpointCancelled { .. } => "checkpoint_cancelled",
            OutboundMessage::Output { .. } => "output",
            OutboundMessage::InputRequired { .. } => "input_required",
            OutboundMessage::InputWithdrawn { .. } => "input_withdrawn",
            OutboundMessage::RunFinished { .. } => "run_finished",
            OutboundMessage::ConnectionEstablished { .. } => "connection_established",
            OutboundMessage::Error { .. } => "error",
        }
    }

    /// Per-run sequence number, for messages produced by a run
    pub fn sequence(&self) -> Option<u64> {
        match self {
            OutboundMessage::Output { sequence, .. }
            | OutboundMessage::InputRequired { sequence, .. }
            | OutboundMessage::InputWithdrawn { sequence, .. }
            | OutboundMessage::RunFinished { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    /// Extract checkpoint ID if present
    pub fn checkpoint_id(&self) -> Option<&str> {
        match self {
            OutboundMessage::CheckpointRequired { checkpoint_id, .. }
            | OutboundMessage::CheckpointAssigned { checkpoint_id, .. }
            | OutboundMessage::CheckpointResolved { checkpoint_id, .. }
            | OutboundMessage::CheckpointCancelled { checkpoint_id, .. } => Some(checkpoint_id),
            _ => None,
        }
    }

    /// Build an error frame
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    /// Convert to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames a subscriber may send over a live connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Join another topic on the same connection
    Subscribe {
        topic_type: String,
        topic_id: String,
    },

    /// Leave one topic, or every topic when none is named
    Unsubscribe {
        topic_type: Option<String>,
        topic_id: Option<String>,
    },

    /// Answer a checkpoint
    CheckpointResponse {
        checkpoint_id: String,
        reviewer_id: Option<String>,
        decision: String,
        #[serde(default)]
        feedback: String,
        suggestions: Option<serde_json::Value>,
        changes: Option<serde_json::Value>,
        time_spent_secs: Option<u64>,
    },

    /// Answer an input prompt
    InputReply { request_id: String, answer: String },

    /// Keep-alive
    Ping,
}

impl InboundMessage {
    /// Parse a text frame
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_message_shape() {
        let msg = OutboundMessage::Output {
            run_id: "run-1".to_string(),
            text: "Drafting chapter 2".to_string(),
            sequence: 7,
            kind: "stage".to_string(),
            role: None,
            stage: Some("2".to_string()),
            timestamp: timestamp(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "output");
        assert_eq!(value["sequence"], 7);
        assert_eq!(msg.sequence(), Some(7));
    }

    #[test]
    fn test_checkpoint_required_shape() {
        let msg = OutboundMessage::CheckpointRequired {
            checkpoint_id: "cp-1".to_string(),
            workflow_id: "wf-1".to_string(),
            checkpoint_type: "style_approval".to_string(),
            title: "Style".to_string(),
            description: String::new(),
            priority: "high".to_string(),
            assignee: None,
            expires_at: None,
            timestamp: timestamp(),
        };
        assert_eq!(msg.event_type(), "checkpoint_required");
        assert_eq!(msg.checkpoint_id(), Some("cp-1"));
    }

    #[test]
    fn test_connection_established_serialization() {
        let msg = OutboundMessage::ConnectionEstablished {
            subscriber_id: "alice".to_string(),
            topic_type: TopicType::Workflow,
            topic_id: "wf-1".to_string(),
            timestamp: timestamp(),
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"connection_established\""));
        assert!(json.contains("\"topic_type\":\"workflow\""));
    }

    #[test]
    fn test_inbound_parsing() {
        let frame = InboundMessage::from_json(
            r#"{"type":"checkpoint_response","checkpoint_id":"cp-1","decision":"approve","feedback":"ok"}"#,
        )
        .unwrap();
        match frame {
            InboundMessage::CheckpointResponse {
                checkpoint_id,
                decision,
                reviewer_id,
                ..
            } => {
                assert_eq!(checkpoint_id, "cp-1");
                assert_eq!(decision, "approve");
                assert!(reviewer_id.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let reply = InboundMessage::from_json(r#"{"type":"input_reply","request_id":"r1","answer":"yes"}"#)
            .unwrap();
        assert_eq!(
            reply,
            InboundMessage::InputReply {
                request_id: "r1".to_string(),
                answer: "yes".to_string()
            }
        );
        assert!(InboundMessage::from_json(r#"{"type":"launch"}"#).is_err());
    }
}
