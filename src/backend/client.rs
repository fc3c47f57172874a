//! Resilient backend client.

use super::{
    Admission, BackendError, BackendMetrics, BackendStats, BackendTransport, ChatRequest,
    CircuitBreaker, CircuitConfig, CircuitState, HealthConfig, HealthMonitor, PoolConfig,
    PoolStats, SlotPool,
};
use crate::models::Deadline;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Backend client configuration.
#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    /// Model name sent with each request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whether to request streamed responses.
    pub stream: bool,
    /// Per-attempt timeout, further bounded by the caller's deadline.
    pub call_timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Largest backoff delay.
    pub backoff_cap: Duration,
    /// Circuit breaker settings.
    pub circuit: CircuitConfig,
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Health probe settings.
    pub health: HealthConfig,
}

impl Default for BackendClientConfig {
    fn default() -> Self {
        Self {
            model: "koboldcpp".to_string(),
            temperature: 0.3,
            stream: false,
            call_timeout: Duration::from_secs(45),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(16),
            circuit: CircuitConfig::default(),
            pool: PoolConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl BackendClientConfig {
    /// Sets the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff base and cap.
    #[must_use]
    pub const fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Sets the circuit breaker configuration.
    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the connection pool configuration.
    #[must_use]
    pub const fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the health probe configuration.
    #[must_use]
    pub const fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Enables streamed responses.
    #[must_use]
    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Backoff before retry number `attempt` (zero-based): `base * 2^attempt`,
    /// capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

/// Circuit and backend health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitHealth {
    /// Breaker state.
    pub state: CircuitState,
    /// Failures as tracked by the breaker.
    pub consecutive_failures: u32,
    /// Health score in `0.0..=100.0`.
    pub health_score: f64,
    /// Cached health probe verdict.
    pub backend_healthy: bool,
    /// Call statistics.
    pub stats: BackendStats,
    /// Connection pool statistics.
    pub pool: PoolStats,
}

/// Single entry point to the generation backend.
///
/// Every call passes, in order: the health gate, the circuit breaker, the
/// connection pool, and a bounded retry loop. All waits are bounded by the
/// caller's deadline.
pub struct BackendClient {
    transport: Arc<dyn BackendTransport>,
    config: BackendClientConfig,
    circuit: Mutex<CircuitBreaker>,
    pool: SlotPool,
    health: HealthMonitor,
    stats: BackendMetrics,
}

impl BackendClient {
    /// Creates a client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn BackendTransport>, config: BackendClientConfig) -> Self {
        let circuit = CircuitBreaker::new(config.circuit.clone());
        let pool = SlotPool::new("backend", config.pool.clone());
        let health = HealthMonitor::new(config.health.clone());
        Self {
            transport,
            config,
            circuit: Mutex::new(circuit),
            pool,
            health,
            stats: BackendMetrics::new(),
        }
    }

    /// Client configuration.
    #[must_use]
    pub const fn config(&self) -> &BackendClientConfig {
        &self.config
    }

    /// Transport name.
    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Sends `prompt` with an output budget of `max_tokens`, giving up after
    /// `timeout`.
    pub fn call(
        &self,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, BackendError> {
        self.call_until(prompt, max_tokens, &Deadline::after(timeout))
    }

    /// Like [`BackendClient::call`], bounded by a shared deadline that the
    /// caller may cancel.
    #[instrument(
        skip(self, prompt, deadline),
        fields(
            transport = self.transport.name(),
            prompt_len = prompt.len(),
            status = tracing::field::Empty
        )
    )]
    pub fn call_until(
        &self,
        prompt: &str,
        max_tokens: u32,
        deadline: &Deadline,
    ) -> Result<String, BackendError> {
        let transport = self.transport.name();
        let span = tracing::Span::current();

        if !self.health.is_healthy() && !self.health.refresh(self.transport.as_ref()) {
            span.record("status", "unavailable");
            self.count_rejection("unavailable");
            return Err(BackendError::Unavailable);
        }

        let admission = self.lock_circuit().admit(Instant::now());
        if !admission.is_allowed() {
            span.record("status", "circuit_open");
            self.count_rejection("circuit_open");
            return Err(BackendError::CircuitOpen);
        }
        if admission == Admission::Probe {
            tracing::info!(transport, "Circuit half-open, sending probe call");
        }

        let wait = deadline.bound(self.config.pool.queue_wait_timeout);
        let slot = match self.pool.acquire(wait) {
            Ok(slot) => slot,
            Err(err) => {
                self.lock_circuit().on_abandoned();
                span.record("status", "queue_timeout");
                return Err(err);
            },
        };

        let request = ChatRequest::from_prompt(
            self.config.model.clone(),
            prompt,
            max_tokens,
            self.config.temperature,
            self.config.stream,
        );
        let started = Instant::now();
        let result = self.send_with_retries(&request, deadline);
        drop(slot);

        match &result {
            Ok(_) => {
                self.stats.record_success(transport, started.elapsed());
                self.health.record_success(transport);
                let transition = self.lock_circuit().on_success();
                if let Some(state) = transition {
                    tracing::info!(transport, state = state.as_str(), "Circuit closed");
                }
                self.publish_circuit_state();
                span.record("status", "success");
            },
            Err(err) if err.counts_against_circuit() => {
                self.stats
                    .record_failure(transport, err.kind(), &err.to_string());
                let transition = self.lock_circuit().on_failure(Instant::now());
                if let Some(state) = transition {
                    tracing::warn!(
                        transport,
                        state = state.as_str(),
                        error = %err,
                        "Circuit opened"
                    );
                }
                self.publish_circuit_state();
                span.record("status", err.kind().as_str());
            },
            Err(err) => {
                self.lock_circuit().on_abandoned();
                span.record("status", err.kind().as_str());
            },
        }
        result
    }

    fn send_with_retries(
        &self,
        request: &ChatRequest,
        deadline: &Deadline,
    ) -> Result<String, BackendError> {
        let transport = self.transport.name();
        let mut attempt = 0_u32;
        loop {
            if deadline.is_expired() {
                return Err(BackendError::DeadlineExceeded);
            }
            let timeout = deadline.bound(self.config.call_timeout);
            let err = match self.transport.send(request, timeout) {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            self.stats.record_attempt_error(transport, err.kind());

            if !err.is_transient() || attempt >= self.config.max_retries {
                return Err(err);
            }
            if err.corrupts_connection() {
                self.transport.reset();
            }

            let delay = self.config.backoff(attempt);
            tracing::warn!(
                transport,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retrying backend call"
            );
            metrics::counter!(
                "backend_retries_total",
                "transport" => transport,
                "error" => err.kind().as_str()
            )
            .increment(1);

            if !deadline.sleep(delay) {
                return Err(err);
            }
            attempt += 1;
        }
    }

    /// Probes backend health now (throttled to the configured interval).
    pub fn probe_health(&self) -> bool {
        self.health.refresh(self.transport.as_ref())
    }

    /// Reclaims leaked connection slots.
    pub fn reclaim_stuck_slots(&self) -> usize {
        self.pool.reclaim_stuck()
    }

    /// Current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.lock_circuit().state()
    }

    /// Circuit and health snapshot.
    #[must_use]
    pub fn circuit_health(&self) -> CircuitHealth {
        let (state, consecutive_failures) = {
            let circuit = self.lock_circuit();
            (circuit.state(), circuit.consecutive_failures())
        };
        let stats = self.stats.snapshot();
        CircuitHealth {
            state,
            consecutive_failures,
            health_score: stats.health_score,
            backend_healthy: self.health.is_healthy(),
            stats,
            pool: self.pool.stats(),
        }
    }

    /// Operator escape hatch: frees every connection slot, rebuilds the
    /// transport session and closes the circuit.
    pub fn force_reset(&self) {
        self.pool.force_reset();
        self.transport.reset();
        self.lock_circuit().reset();
        self.publish_circuit_state();
        tracing::warn!(transport = self.transport.name(), "Backend client force reset");
    }

    fn lock_circuit(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.circuit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_circuit_state(&self) {
        let state = self.lock_circuit().state();
        metrics::gauge!(
            "backend_circuit_breaker_state",
            "transport" => self.transport.name()
        )
        .set(f64::from(state.gauge_value()));
    }

    fn count_rejection(&self, reason: &'static str) {
        metrics::counter!(
            "backend_rejections_total",
            "transport" => self.transport.name(),
            "reason" => reason
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FnTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> BackendClientConfig {
        BackendClientConfig::default()
            .with_max_retries(2)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4))
            .with_health(HealthConfig::default().with_enabled(false))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = BackendClientConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(3), Duration::from_secs(8));
        assert_eq!(config.backoff(4), Duration::from_secs(16));
        assert_eq!(config.backoff(10), Duration::from_secs(16));
        assert_eq!(config.backoff(40), Duration::from_secs(16));
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport = FnTransport::new("flaky", move |_: &ChatRequest, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BackendError::Timeout(Duration::from_millis(1)))
            } else {
                Ok("done".to_string())
            }
        });
        let client = BackendClient::new(Arc::new(transport), fast_config());
        assert_eq!(
            client.call("p", 64, Duration::from_secs(5)),
            Ok("done".to_string())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.circuit_health().stats.successful_requests, 1);
    }

    #[test]
    fn test_non_transient_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport = FnTransport::new("strict", move |_: &ChatRequest, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Status {
                status: 400,
                body: "bad".to_string(),
            })
        });
        let client = BackendClient::new(Arc::new(transport), fast_config());
        assert!(matches!(
            client.call("p", 64, Duration::from_secs(5)),
            Err(BackendError::Status { status: 400, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retries_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport = FnTransport::new("down", move |_: &ChatRequest, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Connection("refused".to_string()))
        });
        let client = BackendClient::new(Arc::new(transport), fast_config());
        assert!(client.call("p", 64, Duration::from_secs(5)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.circuit_health().stats.failed_requests, 1);
    }

    #[test]
    fn test_unhealthy_backend_is_rejected_without_send() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport = Arc::new(FnTransport::new("sick", move |_: &ChatRequest, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        }));
        transport.set_healthy(false);
        let client = BackendClient::new(
            transport,
            fast_config().with_health(HealthConfig::default()),
        );
        assert!(!client.probe_health());
        assert_eq!(
            client.call("p", 64, Duration::from_secs(1)),
            Err(BackendError::Unavailable)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_force_reset_closes_circuit() {
        let transport = FnTransport::new("down", |_: &ChatRequest, _| {
            Err(BackendError::Malformed("x".to_string()))
        });
        let client = BackendClient::new(
            Arc::new(transport),
            fast_config().with_circuit(CircuitConfig::default().with_failure_threshold(1)),
        );
        assert!(client.call("p", 64, Duration::from_secs(1)).is_err());
        assert_eq!(client.circuit_state(), CircuitState::Open);
        client.force_reset();
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }
}
