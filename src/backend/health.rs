//! Cached backend health probing.

use super::BackendTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Health probe configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Whether calls are gated on the probe result.
    pub enabled: bool,
    /// Minimum time between probes.
    pub interval: Duration,
    /// Timeout of a single probe.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthConfig {
    /// Enables or disables health gating.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the probe interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Throttled health probe with a cached verdict.
///
/// Reading the verdict never blocks on I/O; refreshing it runs at most once
/// per interval no matter how many callers ask.
#[derive(Debug)]
pub struct HealthMonitor {
    config: HealthConfig,
    healthy: AtomicBool,
    last_probe: Mutex<Option<Instant>>,
}

impl HealthMonitor {
    /// Creates a monitor that starts out healthy.
    #[must_use]
    pub const fn new(config: HealthConfig) -> Self {
        Self {
            config,
            healthy: AtomicBool::new(true),
            last_probe: Mutex::new(None),
        }
    }

    /// Cached verdict. Always `true` when gating is disabled.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.config.enabled || self.healthy.load(Ordering::Acquire)
    }

    /// Probes the backend unless a probe ran within the interval, and
    /// returns the (possibly cached) verdict.
    pub fn refresh(&self, transport: &dyn BackendTransport) -> bool {
        if !self.config.enabled {
            return true;
        }
        {
            let mut last = self
                .last_probe
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| at.elapsed() < self.config.interval) {
                return self.healthy.load(Ordering::Acquire);
            }
            *last = Some(Instant::now());
        }

        let healthy = transport.probe(self.config.probe_timeout);
        self.set(healthy, transport.name());
        healthy
    }

    /// A completed call proves the backend is reachable.
    pub fn record_success(&self, transport_name: &'static str) {
        self.set(true, transport_name);
    }

    fn set(&self, healthy: bool, transport_name: &'static str) {
        let previous = self.healthy.swap(healthy, Ordering::AcqRel);
        if previous != healthy {
            if healthy {
                tracing::info!(transport = transport_name, "Backend healthy again");
            } else {
                tracing::warn!(transport = transport_name, "Backend health probe failing");
            }
        }
        metrics::gauge!("backend_healthy", "transport" => transport_name)
            .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &HealthConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatRequest, FnTransport};

    #[test]
    fn test_refresh_is_throttled() {
        let transport = FnTransport::new("probe", |_: &ChatRequest, _| Ok(String::new()));
        let monitor =
            HealthMonitor::new(HealthConfig::default().with_interval(Duration::from_secs(60)));

        transport.set_healthy(false);
        assert!(!monitor.refresh(&transport));
        assert!(!monitor.is_healthy());

        // Within the interval the cached verdict is returned without probing.
        transport.set_healthy(true);
        assert!(!monitor.refresh(&transport));

        monitor.record_success("probe");
        assert!(monitor.is_healthy());
    }

    #[test]
    fn test_disabled_monitor_is_always_healthy() {
        let transport = FnTransport::new("probe", |_: &ChatRequest, _| Ok(String::new()));
        transport.set_healthy(false);
        let monitor = HealthMonitor::new(HealthConfig::default().with_enabled(false));
        assert!(monitor.refresh(&transport));
        assert!(monitor.is_healthy());
    }
}
