//! Circuit breaker state machine.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    /// Sets the failure threshold (minimum 1).
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the success threshold (minimum 1).
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub const fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without I/O.
    Open,
    /// One probe at a time is let through.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Gauge value: 0 closed, 1 open, 2 half-open.
    #[must_use]
    pub const fn gauge_value(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { successes: u32, probe_in_flight: bool },
}

/// Admission decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed.
    Allowed,
    /// The call is the half-open probe.
    Probe,
    /// Circuit open, or a probe is already in flight.
    Rejected,
}

impl Admission {
    /// True unless rejected.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Three-state circuit breaker.
///
/// Not synchronized; callers wrap it in a mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    config: CircuitConfig,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub const fn new(config: CircuitConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            config,
        }
    }

    /// Decides whether a call may proceed at `now`.
    ///
    /// An open circuit past its recovery timeout moves to half-open and
    /// admits exactly one probe; further calls are rejected until that probe
    /// reports back.
    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.config.recovery_timeout {
                    self.state = BreakerState::HalfOpen {
                        successes: 0,
                        probe_in_flight: true,
                    };
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            },
            BreakerState::HalfOpen {
                ref mut probe_in_flight,
                ..
            } => {
                if *probe_in_flight {
                    Admission::Rejected
                } else {
                    *probe_in_flight = true;
                    Admission::Probe
                }
            },
        }
    }

    /// Records a successful call. Returns the new state on a transition.
    pub fn on_success(&mut self) -> Option<CircuitState> {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_sub(1);
                None
            },
            BreakerState::HalfOpen { successes, .. } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    self.state = BreakerState::Closed;
                    self.consecutive_failures = 0;
                    Some(CircuitState::Closed)
                } else {
                    self.state = BreakerState::HalfOpen {
                        successes,
                        probe_in_flight: false,
                    };
                    None
                }
            },
            // Late success from a call admitted before the circuit opened.
            BreakerState::Open { .. } => None,
        }
    }

    /// Records a failed call at `now`. Returns the new state on a transition.
    pub fn on_failure(&mut self, now: Instant) -> Option<CircuitState> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = BreakerState::Open { opened_at: now };
                    Some(CircuitState::Open)
                } else {
                    None
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open { opened_at: now };
                Some(CircuitState::Open)
            },
            BreakerState::Open { .. } => None,
        }
    }

    /// Releases a probe slot for a call that ended without a verdict on
    /// backend health (deadline, queue timeout).
    pub const fn on_abandoned(&mut self) {
        if let BreakerState::HalfOpen {
            ref mut probe_in_flight,
            ..
        } = self.state
        {
            *probe_in_flight = false;
        }
    }

    /// Forces the breaker closed.
    pub const fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        match self.state {
            BreakerState::Closed => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Consecutive failures as tracked by the breaker.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &CircuitConfig {
        &self.config
    }
}
