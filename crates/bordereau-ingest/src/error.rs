//! Pipeline error types
//!
//! Every operation surfaces one of four failure kinds (see [`ErrorKind`]).
//! Per-entry and per-path failures inside a batch are recorded in the
//! operation's report instead of being raised.

use bordereau_common::types::QueueStatus;
use bordereau_common::BordereauError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Coarse classification callers use to decide whether to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Storage, network, database or timeout failure; safe to re-invoke
    TransientIo,
    /// File content or processing unit failure
    Data,
    /// Request rejected by a policy; do not retry blindly
    PolicyViolation,
    /// The external scheduler is unavailable and the fallback failed too
    Systemic,
    NotFound,
}

/// Pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{operation} timed out after {secs}s", secs = .timeout.as_secs())]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    /// The record kept changing under a read-then-write sequence
    #[error("Concurrent update: {0}")]
    Contention(String),

    #[error("Processing failed: {0}")]
    Data(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Entry {id} is {status}; only FAILED or SUCCESS entries can be reprocessed")]
    InvalidState { id: Uuid, status: QueueStatus },

    #[error("Scheduler unavailable: {0}")]
    Systemic(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] BordereauError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Database(_)
            | PipelineError::Storage(_)
            | PipelineError::Timeout { .. }
            | PipelineError::Contention(_) => ErrorKind::TransientIo,
            PipelineError::Data(_) => ErrorKind::Data,
            PipelineError::PolicyViolation(_)
            | PipelineError::InvalidState { .. }
            | PipelineError::Config(_) => ErrorKind::PolicyViolation,
            PipelineError::Systemic(_) => ErrorKind::Systemic,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Common(err) => match err {
                BordereauError::Io(_) => ErrorKind::TransientIo,
                BordereauError::Serialization(_) => ErrorKind::Data,
                _ => ErrorKind::PolicyViolation,
            },
        }
    }

    /// Whether re-invoking the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientIo
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        PipelineError::Storage(err.to_string())
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        PipelineError::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Common(BordereauError::Io(err))
    }
}

/// Await `future`, failing with [`PipelineError::Timeout`] once `limit` elapses.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> PipelineResult<T>
where
    F: std::future::Future<Output = PipelineResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::timeout(operation, limit)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PipelineError::storage("connection reset").kind(), ErrorKind::TransientIo);
        assert!(PipelineError::timeout("list", Duration::from_secs(10)).is_retryable());
        assert_eq!(PipelineError::Data("bad header".into()).kind(), ErrorKind::Data);
        assert_eq!(
            PipelineError::InvalidState {
                id: Uuid::new_v4(),
                status: QueueStatus::Pending
            }
            .kind(),
            ErrorKind::PolicyViolation
        );
        assert_eq!(PipelineError::Systemic("down".into()).kind(), ErrorKind::Systemic);
        assert!(!PipelineError::PolicyViolation("root only".into()).is_retryable());
    }

    #[test]
    fn test_illegal_transition_is_policy_violation() {
        let err: PipelineError = QueueStatus::Pending
            .ensure_transition(QueueStatus::Success)
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::PolicyViolation);
    }

    #[test]
    fn test_timeout_message() {
        let err = PipelineError::timeout("processing unit", Duration::from_secs(1200));
        assert_eq!(err.to_string(), "processing unit timed out after 1200s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let result: PipelineResult<()> = with_timeout("slow call", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Timeout { .. })));
    }
}
