//! # extractd
//!
//! Adaptive-depth extraction coordinator for a slow, rate-limited
//! text-generation backend.
//!
//! Conversational text comes in; structured memory facts come out. Most
//! requests never reach the backend: results are cached, small talk and
//! common phrasings are handled by local pattern rules, and everything else
//! is scored for complexity and sent at the cheapest depth that will do.
//!
//! ## Features
//!
//! - Three tiers (Fast, Shallow, Deep) chosen per request by a complexity score
//! - Local pattern rules with fuzzy place matching for the Fast tier
//! - TTL result cache and coalescing of identical in-flight requests
//! - Circuit breaker, bounded connection pool, retries and health probes
//!   around the backend
//! - At most one Deep-tier call in flight, plus per-key and global Deep budgets
//! - Priority lanes so interactive requests overtake background work
//!
//! ## Example
//!
//! ```rust,no_run
//! use extractd::config::ExtractdConfig;
//! use extractd::coordinator::CoordinatorService;
//! use extractd::models::{Request, RequestKind};
//!
//! let config = ExtractdConfig::load(None)?;
//! let service = CoordinatorService::from_config(&config)?;
//! let outcome = service.submit(&Request::new(
//!     "alice",
//!     "I finished reading Dune last night",
//!     RequestKind::UserInput,
//! ));
//! println!("{}", serde_json::to_string(&outcome).unwrap_or_default());
//! # Ok::<(), extractd::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod backend;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod extraction;
pub mod models;
pub mod observability;

pub use config::ExtractdConfig;
pub use coordinator::{CoordinatorService, MetricsSnapshot};
pub use models::{ExtractionOutcome, Facts, Priority, Request, RequestKind, Tier};

/// Error type for extractd setup operations.
///
/// Request processing never returns this type: `submit` reports every
/// problem inside [`ExtractionOutcome`].
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Out-of-range configuration values, invalid log filters |
/// | `OperationFailed` | Config file I/O or parsing, runtime or exporter setup |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Tier thresholds are inverted
    /// - A temperature is out of range
    /// - A log filter directive does not parse
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - The configuration file cannot be read or parsed
    /// - The worker runtime cannot start
    /// - A subscriber or metrics recorder is already installed
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for extractd operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");
    }
}
