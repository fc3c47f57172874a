//! Request coordination.
//!
//! [`CoordinatorService`] is the single entry point: it decides for every
//! request whether it can be answered locally or needs the backend, at
//! which depth, and under which priority.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ActivityTracker`] | Owners who spoke recently |
//! | [`derive_priority`] | Priority from request kind and recent activity |
//! | [`DeepTierLimiter`] | Per-key and global Deep-tier budgets |
//! | [`DeepTierGate`] | At most one Deep call in flight |
//! | [`CoordinatorMetrics`] | Request counters and latency average |

mod activity;
mod config;
mod gate;
mod limiter;
mod priority;
mod service;
mod stats;

pub use activity::ActivityTracker;
pub use config::CoordinatorConfig;
pub use gate::DeepTierGate;
pub use limiter::{DeepAdmission, DeepTierLimiter, GLOBAL_WINDOW};
pub use priority::{ContinuationMatcher, DEFAULT_CONTINUATION_KEYWORDS, derive_priority};
pub use service::{CoordinatorBuilder, CoordinatorService};
pub use stats::{CoordinatorMetrics, MetricsSnapshot, Path};
