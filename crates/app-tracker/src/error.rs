//! Unified error handling for a tracking run.
//!
//! Each variant corresponds to a pipeline stage so failures can be logged with
//! the stage that produced them. Only [`TrackerError::Auth`] is fatal; the
//! orchestrator isolates every other error to the record or cycle it hit.

use thiserror::Error;

/// Unified error type for the tracker pipeline
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Mailbox listing or message retrieval failed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// LLM unreachable, rate limited, timed out or returned an invalid label
    #[error("Classification error: {0}")]
    Classification(String),

    /// Spreadsheet read or write failed
    #[error("Reconciliation error for {key}: {message}")]
    Reconciliation { key: String, message: String },

    /// Spreadsheet collaborator failure before a row key is known
    #[error("Sheet error: {0}")]
    Sheet(String),

    /// Credentials expired, revoked or missing
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint file unreadable or unwritable
    #[error("State error: {0}")]
    State(String),
}

impl TrackerError {
    pub fn fetch(message: impl Into<String>) -> Self {
        TrackerError::Fetch(message.into())
    }

    pub fn classification(message: impl Into<String>) -> Self {
        TrackerError::Classification(message.into())
    }

    pub fn sheet(message: impl Into<String>) -> Self {
        TrackerError::Sheet(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        TrackerError::Auth(message.into())
    }

    /// No further progress is possible; the process should exit
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackerError::Auth(_))
    }

    /// Pipeline stage, for log context
    pub fn stage(&self) -> &'static str {
        match self {
            TrackerError::Fetch(_) => "fetch",
            TrackerError::Classification(_) => "classify",
            TrackerError::Reconciliation { .. } | TrackerError::Sheet(_) => "reconcile",
            TrackerError::Auth(_) => "auth",
            TrackerError::Config(_) => "config",
            TrackerError::State(_) => "state",
        }
    }
}

/// Result type alias for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auth_is_fatal() {
        assert!(TrackerError::auth("token revoked").is_fatal());
        assert!(!TrackerError::fetch("503").is_fatal());
        assert!(!TrackerError::classification("timeout").is_fatal());
        assert!(!TrackerError::Reconciliation {
            key: "Acme / Engineer".to_string(),
            message: "quota".to_string(),
        }
        .is_fatal());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = TrackerError::Reconciliation {
            key: "Acme / Engineer".to_string(),
            message: "write conflict".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Reconciliation error for Acme / Engineer: write conflict"
        );
        assert_eq!(err.stage(), "reconcile");
        assert_eq!(TrackerError::sheet("429 quota").stage(), "reconcile");
        assert_eq!(
            TrackerError::State("disk full".to_string()).to_string(),
            "State error: disk full"
        );
    }
}
