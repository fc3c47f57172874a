//! Extraction outcomes and error classification.

use super::{Facts, Tier};
use serde::Serialize;
use std::fmt;

/// Classified failure reason carried by [`ExtractionOutcome::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A deadline expired before the backend answered.
    Timeout,
    /// Connection-level failure talking to the backend.
    Transport,
    /// The backend closed the response mid-body or mid-stream.
    IncompleteResponse,
    /// The circuit breaker rejected the call without I/O.
    CircuitOpen,
    /// No connection slot became free within the queue wait.
    QueueTimeout,
    /// The backend answered with something that is not a completion.
    MalformedResponse,
    /// The backend refused the request (non-retryable status).
    Rejected,
    /// The health probe reports the backend as down.
    Unavailable,
    /// The coordinator is closing.
    ShuttingDown,
}

impl ErrorKind {
    /// Returns all error kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Timeout,
            Self::Transport,
            Self::IncompleteResponse,
            Self::CircuitOpen,
            Self::QueueTimeout,
            Self::MalformedResponse,
            Self::Rejected,
            Self::Unavailable,
            Self::ShuttingDown,
        ]
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::IncompleteResponse => "incomplete_response",
            Self::CircuitOpen => "circuit_open",
            Self::QueueTimeout => "queue_timeout",
            Self::MalformedResponse => "malformed_response",
            Self::Rejected => "rejected",
            Self::Unavailable => "unavailable",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a result is only partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Fast tier was selected but no rule matched.
    NoPatternMatch,
    /// The backend answered but its output could not be parsed.
    UnparseableOutput,
    /// An interactive caller met a backend that would not take the call.
    BackendUnavailable(ErrorKind),
}

impl DegradedReason {
    /// Returns the reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoPatternMatch => "no_pattern_match",
            Self::UnparseableOutput => "unparseable_output",
            Self::BackendUnavailable(_) => "backend_unavailable",
        }
    }
}

/// Result of one submitted request. Every submission yields exactly one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Facts were extracted.
    Success {
        /// Extracted facts.
        facts: Facts,
        /// Tier that produced the facts.
        tier_used: Tier,
        /// True when served from the cache or from a coalesced leader.
        cache_hit: bool,
    },
    /// Something usable, but not a full extraction.
    Degraded {
        /// Best-effort facts.
        partial: Facts,
        /// Why the result is partial.
        reason: DegradedReason,
        /// True when served from the cache or from a coalesced leader.
        cache_hit: bool,
    },
    /// No facts could be produced.
    Failure {
        /// Classified cause.
        error: ErrorKind,
    },
}

impl ExtractionOutcome {
    /// Successful outcome computed fresh.
    #[must_use]
    pub const fn success(facts: Facts, tier_used: Tier) -> Self {
        Self::Success {
            facts,
            tier_used,
            cache_hit: false,
        }
    }

    /// Failure outcome.
    #[must_use]
    pub const fn failure(error: ErrorKind) -> Self {
        Self::Failure { error }
    }

    /// Degraded outcome.
    #[must_use]
    pub const fn degraded(partial: Facts, reason: DegradedReason) -> Self {
        Self::Degraded {
            partial,
            reason,
            cache_hit: false,
        }
    }

    /// True for `Success`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Facts carried by `Success` or `Degraded`.
    #[must_use]
    pub const fn facts(&self) -> Option<&Facts> {
        match self {
            Self::Success { facts, .. } => Some(facts),
            Self::Degraded { partial, .. } => Some(partial),
            Self::Failure { .. } => None,
        }
    }

    /// Tier that produced a successful result.
    #[must_use]
    pub const fn tier_used(&self) -> Option<Tier> {
        match self {
            Self::Success { tier_used, .. } => Some(*tier_used),
            _ => None,
        }
    }

    /// Whether the result was served without new work.
    #[must_use]
    pub const fn cache_hit(&self) -> bool {
        matches!(
            self,
            Self::Success {
                cache_hit: true,
                ..
            } | Self::Degraded {
                cache_hit: true,
                ..
            }
        )
    }

    /// Error kind for `Failure`.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure { error } => Some(*error),
            _ => None,
        }
    }

    /// Marks a reused outcome as served from cache; failures pass through.
    #[must_use]
    pub fn into_cache_hit(self) -> Self {
        match self {
            Self::Success {
                facts, tier_used, ..
            } => Self::Success {
                facts,
                tier_used,
                cache_hit: true,
            },
            Self::Degraded {
                partial, reason, ..
            } => Self::Degraded {
                partial,
                reason,
                cache_hit: true,
            },
            other @ Self::Failure { .. } => other,
        }
    }

    /// Metric/log label for the variant.
    #[must_use]
    pub const fn status_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Degraded { .. } => "degraded",
            Self::Failure { .. } => "failure",
        }
    }
}
