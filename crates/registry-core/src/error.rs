//! Registry error taxonomy and its wire form.

use std::fmt;

use registry_state::{StateError, StorageError};
use serde::{Deserialize, Serialize};

/// Stable, serialisable classification of every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidId,
    NotFound,
    Unavailable,
    DeadlineExceeded,
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidId => "invalid_id",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::DeadlineExceeded => "deadline_exceeded",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::Internal => "internal",
        }
    }

    /// Only transient failures are worth retrying with backoff.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorCode::Unavailable | ErrorCode::DeadlineExceeded)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error half of a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The server could not be reached or did not answer in time.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with something that is not a valid envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An error reported by a remote registry.
    #[error("{code}: {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        RegistryError::InvalidArgument(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::Storage(err) => match err {
                StorageError::InvalidId { .. } => ErrorCode::InvalidId,
                StorageError::NotFound { .. } => ErrorCode::NotFound,
                StorageError::Unavailable(_) => ErrorCode::Unavailable,
                StorageError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
                StorageError::InvalidArgument(_) => ErrorCode::InvalidArgument,
                StorageError::InvalidTransition { .. } | StorageError::IllegalTransition { .. } => {
                    ErrorCode::FailedPrecondition
                }
                StorageError::Backend(_) => ErrorCode::Internal,
            },
            RegistryError::State(StateError::Connection(_)) => ErrorCode::Unavailable,
            RegistryError::State(_) => ErrorCode::Internal,
            RegistryError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            RegistryError::Config(_) => ErrorCode::Internal,
            RegistryError::Transport(_) => ErrorCode::Unavailable,
            RegistryError::Protocol(_) => ErrorCode::Internal,
            RegistryError::Remote { code, .. } => *code,
            RegistryError::Serialization(_) => ErrorCode::InvalidArgument,
            RegistryError::Io(_) => ErrorCode::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().retryable()
    }

    pub fn to_body(&self) -> ErrorBody {
        let code = self.code();
        let message = match self {
            RegistryError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorBody {
            code,
            message,
            retryable: code.retryable(),
        }
    }
}

impl From<ErrorBody> for RegistryError {
    fn from(body: ErrorBody) -> Self {
        RegistryError::Remote {
            code: body.code,
            message: body.message,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Protocol(format!("malformed response: {err}"))
        } else {
            RegistryError::Transport(err.to_string())
        }
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_codes() {
        let cases = [
            (
                StorageError::InvalidId {
                    value: "x".to_string(),
                },
                ErrorCode::InvalidId,
            ),
            (
                StorageError::NotFound {
                    kind: "data",
                    id: "x".to_string(),
                },
                ErrorCode::NotFound,
            ),
            (
                StorageError::Unavailable("down".to_string()),
                ErrorCode::Unavailable,
            ),
            (
                StorageError::DeadlineExceeded {
                    operation: "get",
                    timeout_ms: 5,
                },
                ErrorCode::DeadlineExceeded,
            ),
            (
                StorageError::InvalidArgument("page_size".to_string()),
                ErrorCode::InvalidArgument,
            ),
            (
                StorageError::Backend("boom".to_string()),
                ErrorCode::Internal,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(RegistryError::from(err).code(), code);
        }
    }

    #[test]
    fn undecodable_responses_are_not_retryable() {
        let err = RegistryError::Protocol("GetModel returned HTTP 500: expected value".to_string());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(!err.is_retryable());

        let err = RegistryError::Transport("connection refused".to_string());
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn transition_errors_are_failed_precondition() {
        let illegal = StorageError::IllegalTransition {
            id: "x".to_string(),
            from: "completed".to_string(),
            to: "running".to_string(),
        };
        assert_eq!(
            RegistryError::from(illegal).code(),
            ErrorCode::FailedPrecondition
        );
    }

    #[test]
    fn only_transient_codes_are_retryable() {
        assert!(ErrorCode::Unavailable.retryable());
        assert!(ErrorCode::DeadlineExceeded.retryable());
        assert!(!ErrorCode::NotFound.retryable());
        assert!(!ErrorCode::InvalidId.retryable());
        assert!(!ErrorCode::InvalidArgument.retryable());
    }

    #[test]
    fn error_body_serialises_snake_case() {
        let body = RegistryError::invalid_argument("bad json").to_body();
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["code"], "invalid_argument");
        assert_eq!(value["retryable"], false);
        assert!(value["message"].as_str().unwrap().contains("bad json"));
    }

    #[test]
    fn remote_errors_keep_code_and_message() {
        let body = ErrorBody {
            code: ErrorCode::NotFound,
            message: "data not found: abc".to_string(),
            retryable: false,
        };
        let err = RegistryError::from(body.clone());
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_body(), body);
    }
}
