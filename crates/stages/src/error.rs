use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service was reachable but answered with an error or a payload we could not use.
    UpstreamError,
    /// The request was blocked locally before any network call.
    PolicyRejected,
    /// A deadline or the poll budget ran out.
    Timeout,
    /// The caller aborted the run.
    Cancelled,
    /// The stage was handed a request it cannot act on, such as another stage's parameters.
    InvalidInput,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UpstreamError => "upstream_error",
            FailureKind::PolicyRejected => "policy_rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InvalidInput => "invalid_input",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure payload carried by [`StageResult::Failure`](crate::StageResult::Failure).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl StageFailure {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::UpstreamError,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PolicyRejected,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InvalidInput,
            message: message.into(),
            retryable: false,
        }
    }

    /// Map a transport error onto the taxonomy. Timeouts stay timeouts, everything else is upstream.
    pub(crate) fn from_transport(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("{context}: request timed out"))
        } else if err.is_connect() {
            Self::upstream(format!("{context}: connection failed"))
        } else {
            Self::upstream(format!("{context}: request failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = StageFailure::upstream("HTTP 500: boom");
        assert_eq!(err.to_string(), "upstream_error: HTTP 500: boom");
    }

    #[test]
    fn constructors_set_retryable() {
        assert!(StageFailure::upstream("x").retryable);
        assert!(StageFailure::timeout("x").retryable);
        assert!(!StageFailure::policy("x").retryable);
        assert!(!StageFailure::cancelled("x").retryable);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::PolicyRejected).unwrap();
        assert_eq!(json, "\"policy_rejected\"");
    }
}
