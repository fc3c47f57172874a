//! Generation backend access.
//!
//! Everything that talks to the slow, rate-limited text-generation server
//! lives here. Callers go through [`BackendClient`], which layers the
//! resilience mechanisms over a [`BackendTransport`]:
//!
//! ```text
//! call ──► health gate ──► circuit breaker ──► slot pool ──► retry loop ──► transport
//! ```
//!
//! # Transports
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`HttpTransport`] | OpenAI-compatible `/chat/completions` (JSON or SSE) |
//! | [`FnTransport`] | Any completion function, e.g. an in-process model or a test script |

mod circuit;
mod client;
mod error;
mod health;
mod http;
mod pool;
mod stats;
mod transport;

pub use circuit::{Admission, CircuitBreaker, CircuitConfig, CircuitState};
pub use client::{BackendClient, BackendClientConfig, CircuitHealth};
pub use error::BackendError;
pub use health::{HealthConfig, HealthMonitor};
pub use http::{
    DEFAULT_ENDPOINT, HttpTransport, HttpTransportConfig, parse_completion_body,
    parse_event_stream,
};
pub use pool::{PoolConfig, PoolStats, Slot, SlotPool};
pub use stats::{BackendMetrics, BackendStats};
pub use transport::{BackendTransport, ChatMessage, ChatRequest, FnTransport};
