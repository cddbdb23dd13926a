//! Error types for gatehouse components
//!
//! Timeouts are not errors anywhere in this crate: an approval that times
//! out returns an [`ApprovalResult`](crate::approval::ApprovalResult) with
//! `timed_out` set, and an input request that times out returns
//! [`InputReply::Fallback`](crate::bridge::InputReply::Fallback).

use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by the checkpoint state machine and approval waits
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    /// Unknown checkpoint ID
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the checkpoint's current status
    #[error("Checkpoint {id} is {status}, cannot {action}")]
    InvalidState {
        id: String,
        status: String,
        action: String,
    },

    /// Malformed input (unknown decision, empty reviewer, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Someone is already waiting on this checkpoint
    #[error("Checkpoint {0} already has an outstanding wait")]
    AlreadyWaiting(String),
}

impl GateError {
    pub(crate) fn invalid_state(id: &str, status: impl ToString, action: &str) -> Self {
        GateError::InvalidState {
            id: id.to_string(),
            status: status.to_string(),
            action: action.to_string(),
        }
    }
}

/// Result type for gate operations
pub type GateResult<T> = std::result::Result<T, GateError>;

/// Errors returned by the execution bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A session for this run is already open
    #[error("Run {0} already has an open bridge session")]
    SessionExists(String),

    /// The bridge was built outside a Tokio runtime
    #[error("No Tokio runtime available for the delivery side")]
    RuntimeUnavailable,

    /// The session ended before the call could be made
    #[error("Bridge session for run {0} is closed")]
    SessionClosed(String),

    /// Unknown run or input request ID
    #[error("Not found: {0}")]
    NotFound(String),

    /// Line classifier patterns failed to compile
    #[error("Failed to build output classifier: {0}")]
    Classifier(#[from] regex::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Errors raised while assembling a [`Gatehouse`](crate::runtime::Gatehouse)
#[derive(Debug, Error)]
pub enum GatehouseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = GateError::invalid_state("cp-1", "approved", "submit a response");
        assert_eq!(
            err.to_string(),
            "Checkpoint cp-1 is approved, cannot submit a response"
        );
    }

    #[test]
    fn test_bridge_error_from_regex() {
        let err: BridgeError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, BridgeError::Classifier(_)));
    }
}
