//! Error types for the list service.

use thiserror::Error;
use todoledger_core::{ScopeIndex, SubmitOutcome};

/// Result type alias for list service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Retry policy class for failed submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors raised by remote-mutating list operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Another group operation holds the busy gate
    #[error("Another list operation is in progress")]
    Busy,

    /// The ledger refused the transaction
    #[error("Ledger rejected transaction ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// The ledger could not be reached
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown list {0}")]
    UnknownList(i64),

    #[error("Unknown task {task_id} in list {list_id}")]
    UnknownTask { list_id: i64, task_id: i64 },

    /// No key to encrypt the record with
    #[error("No secret key for {0}")]
    MissingSecretKey(ScopeIndex),

    #[error(transparent)]
    Core(#[from] todoledger_core::Error),
}

impl ServiceError {
    pub fn rejected(code: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Busy => ApiRetryClass::Retryable,
            Self::Rejected { code, .. } => match *code {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Transport(_) => ApiRetryClass::Retryable,
            Self::UnknownList(_) | Self::UnknownTask { .. } => ApiRetryClass::Permanent,
            Self::MissingSecretKey(_) => ApiRetryClass::Permanent,
            Self::Core(err) => match err {
                todoledger_core::Error::RemoteFetchFailed(_)
                | todoledger_core::Error::Persistence(_) => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
        }
    }

    /// Result classification carried by the service's events.
    pub fn outcome(&self) -> SubmitOutcome {
        match self {
            Self::Busy => SubmitOutcome::Busy,
            Self::Rejected { .. } => SubmitOutcome::Rejected,
            _ => SubmitOutcome::Failed,
        }
    }
}
