//! The I/O capability handed to workflow code
//!
//! A workflow never touches stdout or stdin directly. It receives an
//! [`IoChannel`] and writes output or asks for input through it; whether
//! that goes to live subscribers or straight to the terminal depends on
//! which implementation it was given.

use chrono::{DateTime, Utc};
use realtime::OutboundMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, Write};

/// Classification of one output line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Text,
    /// Progress marker ("Stage 2: drafting")
    Stage,
    /// Line attributed to a named agent role
    Agent,
    Warning,
    Error,
    /// Final result of the run
    Result,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Text => "text",
            OutputKind::Stage => "stage",
            OutputKind::Agent => "agent",
            OutputKind::Warning => "warning",
            OutputKind::Error => "error",
            OutputKind::Result => "result",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed piece of output before it is sequenced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    pub text: String,
    pub kind: OutputKind,
    pub role: Option<String>,
    pub stage: Option<String>,
}

impl Emission {
    pub fn new(text: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            text: text.into(),
            kind,
            role: None,
            stage: None,
        }
    }

    /// Plain text
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, OutputKind::Text)
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// One sequenced output line of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub run_id: String,
    pub sequence: u64,
    pub text: String,
    pub kind: OutputKind,
    pub role: Option<String>,
    pub stage: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OutputEvent {
    pub fn new(run_id: &str, sequence: u64, emission: Emission) -> Self {
        Self {
            run_id: run_id.to_string(),
            sequence,
            text: emission.text,
            kind: emission.kind,
            role: emission.role,
            stage: emission.stage,
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> OutboundMessage {
        OutboundMessage::Output {
            run_id: self.run_id.clone(),
            text: self.text.clone(),
            sequence: self.sequence,
            kind: self.kind.to_string(),
            role: self.role.clone(),
            stage: self.stage.clone(),
            timestamp: self.timestamp.to_rfc3339(),
        }
    }
}

/// Why an input request was answered with the fallback value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Nobody answered before the deadline
    TimedOut,
    /// The session ended while the request was open
    SessionClosed,
    /// The prompt could not be delivered
    Unreachable,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::TimedOut => "timed_out",
            FallbackReason::SessionClosed => "session_closed",
            FallbackReason::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to an input request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InputReply {
    /// A subscriber answered
    Answered { value: String },
    /// The configured default continuation was used instead
    Fallback { value: String, reason: FallbackReason },
}

impl InputReply {
    pub fn answered(value: impl Into<String>) -> Self {
        InputReply::Answered {
            value: value.into(),
        }
    }

    pub fn fallback(value: impl Into<String>, reason: FallbackReason) -> Self {
        InputReply::Fallback {
            value: value.into(),
            reason,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            InputReply::Answered { value } | InputReply::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> String {
        match self {
            InputReply::Answered { value } | InputReply::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, InputReply::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            InputReply::Fallback { reason, .. } => Some(*reason),
            InputReply::Answered { .. } => None,
        }
    }
}

/// Output and input capability of a workflow run
pub trait IoChannel: Send + Sync {
    /// Raw text; complete lines are classified and forwarded
    fn write(&self, text: &str);

    /// Typed output, forwarded as is
    fn emit(&self, emission: Emission);

    /// Forward any partial line still buffered
    fn flush(&self);

    /// Block until someone answers `prompt` or a fallback applies
    fn request_input(&self, prompt: &str) -> InputReply;
}

/// Channel that talks to the local terminal
///
/// Used when a bridge session cannot be opened, so the run still gets
/// working I/O.
#[derive(Debug, Clone, Default)]
pub struct PassthroughIo {
    default_input: String,
}

impl PassthroughIo {
    pub fn new(default_input: impl Into<String>) -> Self {
        Self {
            default_input: default_input.into(),
        }
    }
}

impl IoChannel for PassthroughIo {
    fn write(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
    }

    fn emit(&self, emission: Emission) {
        let mut stdout = io::stdout().lock();
        let _ = match &emission.role {
            Some(role) => writeln!(stdout, "[{}] {}", role, emission.text),
            None => writeln!(stdout, "{}", emission.text),
        };
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }

    fn request_input(&self, prompt: &str) -> InputReply {
        {
            let mut stdout = io::stdout().lock();
            let _ = write!(stdout, "{} ", prompt);
            let _ = stdout.flush();
        }

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                InputReply::fallback(self.default_input.clone(), FallbackReason::Unreachable)
            }
            Ok(_) => InputReply::answered(line.trim_end_matches(['\r', '\n'])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_event_message() {
        let event = OutputEvent::new(
            "run-1",
            3,
            Emission::new("[editor] tightened intro", OutputKind::Agent).with_role("editor"),
        );
        match event.to_message() {
            OutboundMessage::Output {
                sequence, kind, role, ..
            } => {
                assert_eq!(sequence, 3);
                assert_eq!(kind, "agent");
                assert_eq!(role.as_deref(), Some("editor"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_input_reply_accessors() {
        let answered = InputReply::answered("yes");
        assert_eq!(answered.value(), "yes");
        assert!(!answered.is_fallback());

        let fallback = InputReply::fallback("", FallbackReason::TimedOut);
        assert!(fallback.is_fallback());
        assert_eq!(fallback.fallback_reason(), Some(FallbackReason::TimedOut));
        assert_eq!(fallback.into_value(), "");
    }

    #[test]
    fn test_input_reply_serialization() {
        let json = serde_json::to_value(InputReply::fallback("go", FallbackReason::SessionClosed))
            .unwrap();
        assert_eq!(json["status"], "fallback");
        assert_eq!(json["reason"], "session_closed");
        assert_eq!(json["value"], "go");
    }
}
