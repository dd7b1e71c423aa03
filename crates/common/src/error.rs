//! Error types for GameQA

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using GameQA Error
pub type Result<T> = std::result::Result<T, Error>;

/// GameQA error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Navigation to {url} timed out after {seconds}s")]
    NavigationTimeout { url: String, seconds: u64 },

    #[error("Browser session crashed: {0}")]
    SessionCrash(String),

    #[error("Evaluator failure: {0}")]
    EvaluatorFailure(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(kind: &str, id: &str) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    /// Category recorded on a failed job
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidArgument(_) => ErrorCategory::InvalidArgument,
            Error::NotFound { .. } => ErrorCategory::InvalidArgument,
            Error::NavigationTimeout { .. } => ErrorCategory::NavigationTimeout,
            Error::SessionCrash(_) => ErrorCategory::SessionCrash,
            Error::EvaluatorFailure(_) => ErrorCategory::EvaluatorFailure,
            Error::StorageFailure(_) => ErrorCategory::StorageFailure,
            Error::Cancelled(_) => ErrorCategory::Cancelled,
            Error::Browser(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Whether the session can no longer be used: the process died or the
    /// job is being torn down
    pub fn ends_session(&self) -> bool {
        matches!(self, Error::SessionCrash(_) | Error::Cancelled(_))
    }
}

/// Error category surfaced through status polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidArgument,
    NavigationTimeout,
    SessionCrash,
    EvaluatorFailure,
    StorageFailure,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::InvalidArgument => "invalid_argument",
            ErrorCategory::NavigationTimeout => "navigation_timeout",
            ErrorCategory::SessionCrash => "session_crash",
            ErrorCategory::EvaluatorFailure => "evaluator_failure",
            ErrorCategory::StorageFailure => "storage_failure",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}
