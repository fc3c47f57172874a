//! Per-call backend statistics and the derived health score.

use crate::models::ErrorKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Weight of the previous average in the latency moving average.
const LATENCY_DECAY: f64 = 0.8;

/// Without a success for this long the health score is halved.
const STALE_SUCCESS_AFTER: Duration = Duration::from_secs(300);

/// Point-in-time backend statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStats {
    /// Calls that reached the retry loop.
    pub total_requests: u64,
    /// Calls that returned text.
    pub successful_requests: u64,
    /// Calls that failed after retries.
    pub failed_requests: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Failures by kind, counted per attempt.
    pub errors_by_kind: BTreeMap<ErrorKind, u64>,
    /// Moving average of successful call latency.
    pub avg_latency_ms: f64,
    /// Seconds since the last success, if any.
    pub secs_since_success: Option<u64>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Health score in `0.0..=100.0`.
    pub health_score: f64,
}

#[derive(Debug, Default)]
struct StatsState {
    total: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    errors_by_kind: BTreeMap<ErrorKind, u64>,
    avg_latency_ms: f64,
    last_success: Option<Instant>,
    last_error: Option<String>,
}

impl StatsState {
    #[allow(clippy::cast_precision_loss)]
    fn health_score(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let success_rate = self.successes as f64 / self.total as f64 * 100.0;
        let recency = match self.last_success {
            Some(at) if at.elapsed() > STALE_SUCCESS_AFTER => 0.5,
            _ => 1.0,
        };
        let penalty = f64::from(self.consecutive_failures.saturating_mul(10).min(50));
        success_rate.mul_add(recency, -penalty).clamp(0.0, 100.0)
    }
}

/// Thread-safe backend statistics.
#[derive(Debug, Default)]
pub struct BackendMetrics {
    state: Mutex<StatsState>,
}

impl BackendMetrics {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful call.
    pub fn record_success(&self, transport: &'static str, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total += 1;
        state.successes += 1;
        state.consecutive_failures = 0;
        state.last_success = Some(Instant::now());
        state.avg_latency_ms = if state.successes == 1 {
            latency_ms
        } else {
            state
                .avg_latency_ms
                .mul_add(LATENCY_DECAY, latency_ms * (1.0 - LATENCY_DECAY))
        };
        let score = state.health_score();
        drop(state);

        metrics::counter!(
            "backend_requests_total",
            "transport" => transport,
            "status" => "success"
        )
        .increment(1);
        metrics::histogram!("backend_request_duration_ms", "transport" => transport)
            .record(latency_ms);
        metrics::gauge!("backend_health_score", "transport" => transport).set(score);
    }

    /// Records a call that failed after retries.
    pub fn record_failure(&self, transport: &'static str, kind: ErrorKind, message: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.total += 1;
        state.failures += 1;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_error = Some(message.to_string());
        let score = state.health_score();
        drop(state);

        metrics::counter!(
            "backend_requests_total",
            "transport" => transport,
            "status" => "failure",
            "error" => kind.as_str()
        )
        .increment(1);
        metrics::gauge!("backend_health_score", "transport" => transport).set(score);
    }

    /// Records one failed attempt by kind, including attempts that were
    /// retried.
    pub fn record_attempt_error(&self, transport: &'static str, kind: ErrorKind) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state.errors_by_kind.entry(kind).or_insert(0) += 1;
        drop(state);
        metrics::counter!(
            "backend_errors_total",
            "transport" => transport,
            "error" => kind.as_str()
        )
        .increment(1);
    }

    /// Current health score.
    #[must_use]
    pub fn health_score(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .health_score()
    }

    /// Snapshot of all statistics.
    #[must_use]
    pub fn snapshot(&self) -> BackendStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        BackendStats {
            total_requests: state.total,
            successful_requests: state.successes,
            failed_requests: state.failures,
            consecutive_failures: state.consecutive_failures,
            errors_by_kind: state.errors_by_kind.clone(),
            avg_latency_ms: state.avg_latency_ms,
            secs_since_success: state.last_success.map(|at| at.elapsed().as_secs()),
            last_error: state.last_error.clone(),
            health_score: state.health_score(),
        }
    }

    /// Clears all statistics.
    pub fn reset(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StatsState::default();
    }
}
