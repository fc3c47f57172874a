//! Backend call errors.

use crate::models::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Error raised by a backend call.
///
/// | Variant | Transient | Resets connection | Counts against circuit |
/// |---------|-----------|-------------------|------------------------|
/// | `Timeout` | yes | no | yes |
/// | `Connection` | yes | yes | yes |
/// | `Incomplete` | yes | yes | yes |
/// | `Status` (408/429/5xx) | yes | no | yes |
/// | `Status` (other) | no | no | yes |
/// | `Malformed` | no | no | yes |
/// | `CircuitOpen` | no | no | no |
/// | `QueueTimeout` | no | no | no |
/// | `Unavailable` | no | no | no |
/// | `DeadlineExceeded` | no | no | no |
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The transport timed out.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Connecting to or talking to the backend failed.
    #[error("backend connection error: {0}")]
    Connection(String),

    /// The response body or event stream ended early.
    #[error("incomplete backend response: {0}")]
    Incomplete(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The backend answered with something that is not a completion.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// The circuit breaker rejected the call.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// No connection slot became available.
    #[error("timed out after {0:?} waiting for a connection slot")]
    QueueTimeout(Duration),

    /// The health probe reports the backend as down.
    #[error("backend health check failing")]
    Unavailable,

    /// The caller's budget ran out or was cancelled between attempts.
    #[error("request deadline exhausted")]
    DeadlineExceeded,
}

impl BackendError {
    /// Maps the error to the outcome-level classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) | Self::DeadlineExceeded => ErrorKind::Timeout,
            Self::Connection(_) => ErrorKind::Transport,
            Self::Incomplete(_) => ErrorKind::IncompleteResponse,
            Self::Status { status, .. } => {
                if is_retryable_status(*status) {
                    ErrorKind::Transport
                } else {
                    ErrorKind::Rejected
                }
            },
            Self::Malformed(_) => ErrorKind::MalformedResponse,
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::QueueTimeout(_) => ErrorKind::QueueTimeout,
            Self::Unavailable => ErrorKind::Unavailable,
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::Incomplete(_) => true,
            Self::Status { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Whether the transport session should be rebuilt before retrying.
    #[must_use]
    pub const fn corrupts_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Incomplete(_))
    }

    /// Whether the failure reflects backend health. Local admission failures
    /// (circuit, queue, deadline, health gate) do not.
    #[must_use]
    pub const fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Connection(_)
                | Self::Incomplete(_)
                | Self::Status { .. }
                | Self::Malformed(_)
        )
    }
}

const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}
