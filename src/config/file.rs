//! On-disk configuration file structure.
//!
//! Every field is optional; absent fields keep their defaults.

use crate::backend::{BackendClientConfig, HealthConfig, HttpTransportConfig, PoolConfig};
use crate::cache::ResultCacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::extraction::MAX_SCORE;
use crate::observability::{LogFormat, LoggingConfig, MetricsConfig};
use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Backend endpoint and request settings.
    pub backend: Option<ConfigFileBackend>,
    /// Retry and circuit breaker settings.
    pub resilience: Option<ConfigFileResilience>,
    /// Connection pool settings.
    pub pool: Option<ConfigFilePool>,
    /// Health probe settings.
    pub health: Option<ConfigFileHealth>,
    /// Result cache settings.
    pub cache: Option<ConfigFileCache>,
    /// Coordinator settings.
    pub coordinator: Option<ConfigFileCoordinator>,
    /// Tier thresholds and token budgets.
    pub tiers: Option<ConfigFileTiers>,
    /// Logging settings.
    pub logging: Option<ConfigFileLogging>,
    /// Metrics settings.
    pub metrics: Option<ConfigFileMetrics>,
}

/// `[backend]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileBackend {
    /// Chat completion endpoint.
    pub endpoint: Option<String>,
    /// Health endpoint.
    pub health_endpoint: Option<String>,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Sampling temperature, 0.0 to 2.0.
    pub temperature: Option<f32>,
    /// Request streamed responses.
    pub stream: Option<bool>,
    /// Per-attempt timeout.
    pub call_timeout_secs: Option<u64>,
    /// TCP connect timeout.
    pub connect_timeout_secs: Option<u64>,
}

impl ConfigFileBackend {
    pub(super) fn apply(
        self,
        transport: &mut HttpTransportConfig,
        backend: &mut BackendClientConfig,
    ) -> Result<()> {
        if let Some(endpoint) = self.endpoint {
            transport.endpoint = endpoint;
        }
        if self.health_endpoint.is_some() {
            transport.health_endpoint = self.health_endpoint;
        }
        if let Some(key) = self.api_key {
            *transport = transport.clone().with_api_key(key);
        }
        if let Some(secs) = self.connect_timeout_secs {
            transport.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(model) = self.model {
            backend.model = model;
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(Error::InvalidInput(format!(
                    "backend.temperature must be within 0.0..=2.0, got {temperature}"
                )));
            }
            backend.temperature = temperature;
        }
        if let Some(stream) = self.stream {
            backend.stream = stream;
        }
        if let Some(secs) = self.call_timeout_secs {
            backend.call_timeout = Duration::from_secs(secs);
        }
        Ok(())
    }
}

/// `[resilience]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileResilience {
    /// Retries after the first attempt.
    pub max_retries: Option<u32>,
    /// First backoff delay.
    pub backoff_base_ms: Option<u64>,
    /// Largest backoff delay.
    pub backoff_cap_ms: Option<u64>,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: Option<u32>,
    /// Half-open successes before the circuit closes.
    pub success_threshold: Option<u32>,
    /// Open duration before probing.
    pub recovery_timeout_secs: Option<u64>,
}

impl ConfigFileResilience {
    pub(super) fn apply(self, mut backend: BackendClientConfig) -> BackendClientConfig {
        if let Some(retries) = self.max_retries {
            backend.max_retries = retries;
        }
        let base = self
            .backoff_base_ms
            .map_or(backend.backoff_base, Duration::from_millis);
        let cap = self
            .backoff_cap_ms
            .map_or(backend.backoff_cap, Duration::from_millis);
        backend = backend.with_backoff(base, cap);

        let mut circuit = backend.circuit.clone();
        if let Some(threshold) = self.failure_threshold {
            circuit = circuit.with_failure_threshold(threshold);
        }
        if let Some(threshold) = self.success_threshold {
            circuit = circuit.with_success_threshold(threshold);
        }
        if let Some(secs) = self.recovery_timeout_secs {
            circuit = circuit.with_recovery_timeout(Duration::from_secs(secs));
        }
        backend.with_circuit(circuit)
    }
}

/// `[pool]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFilePool {
    /// Maximum concurrent connection slots.
    pub max_concurrent: Option<usize>,
    /// Wait for a free slot.
    pub queue_wait_timeout_secs: Option<u64>,
    /// Age of a leaked slot; 0 disables reclamation.
    pub stuck_after_secs: Option<u64>,
}

impl ConfigFilePool {
    pub(super) fn apply(self, mut pool: PoolConfig) -> PoolConfig {
        if let Some(max) = self.max_concurrent {
            pool = pool.with_max_concurrent(max);
        }
        if let Some(secs) = self.queue_wait_timeout_secs {
            pool = pool.with_queue_wait_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.stuck_after_secs {
            pool = pool.with_stuck_after((secs > 0).then(|| Duration::from_secs(secs)));
        }
        pool
    }
}

/// `[health]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileHealth {
    /// Gate calls on health probes.
    pub enabled: Option<bool>,
    /// Probe interval.
    pub interval_secs: Option<u64>,
    /// Single probe timeout.
    pub probe_timeout_secs: Option<u64>,
}

impl ConfigFileHealth {
    pub(super) fn apply(self, mut health: HealthConfig) -> HealthConfig {
        if let Some(enabled) = self.enabled {
            health.enabled = enabled;
        }
        if let Some(secs) = self.interval_secs {
            health.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.probe_timeout_secs {
            health.probe_timeout = Duration::from_secs(secs);
        }
        health
    }
}

/// `[cache]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileCache {
    /// Entry lifetime.
    pub ttl_secs: Option<u64>,
    /// Entry limit.
    pub max_entries: Option<usize>,
    /// Coalescing window for identical in-flight requests.
    pub dedup_window_secs: Option<u64>,
}

impl ConfigFileCache {
    pub(super) fn apply(self, mut cache: ResultCacheConfig) -> ResultCacheConfig {
        if let Some(secs) = self.ttl_secs {
            cache = cache.with_ttl(Duration::from_secs(secs));
        }
        if let Some(entries) = self.max_entries {
            cache = cache.with_max_entries(entries);
        }
        if let Some(secs) = self.dedup_window_secs {
            cache = cache.with_dedup_window(Duration::from_secs(secs));
        }
        cache
    }
}

/// `[coordinator]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileCoordinator {
    /// Worker threads for backend calls.
    pub worker_threads: Option<usize>,
    /// Background lane width.
    pub background_concurrency: Option<usize>,
    /// Budget of requests without a timeout.
    pub default_timeout_secs: Option<u64>,
    /// Owner activity window.
    pub activity_window_secs: Option<u64>,
    /// Per-key Deep window.
    pub deep_key_window_secs: Option<u64>,
    /// Deep runs per minute across the process.
    pub deep_global_per_minute: Option<usize>,
    /// Continuation phrases for fusion requests.
    pub continuation_keywords: Option<Vec<String>>,
    /// Maintenance interval.
    pub maintenance_interval_secs: Option<u64>,
}

impl ConfigFileCoordinator {
    pub(super) fn apply(self, mut config: CoordinatorConfig) -> CoordinatorConfig {
        if let Some(threads) = self.worker_threads {
            config = config.with_worker_threads(threads);
        }
        if let Some(width) = self.background_concurrency {
            config = config.with_background_concurrency(width);
        }
        if let Some(secs) = self.default_timeout_secs {
            config = config.with_default_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.activity_window_secs {
            config = config.with_activity_window(Duration::from_secs(secs));
        }
        if self.deep_key_window_secs.is_some() || self.deep_global_per_minute.is_some() {
            let window = self
                .deep_key_window_secs
                .map_or(config.deep_key_window, Duration::from_secs);
            let per_minute = self
                .deep_global_per_minute
                .unwrap_or(config.deep_global_per_minute);
            config = config.with_deep_limits(window, per_minute);
        }
        if let Some(keywords) = self.continuation_keywords {
            config.continuation_keywords = keywords;
        }
        if let Some(secs) = self.maintenance_interval_secs {
            config = config.with_maintenance_interval(Duration::from_secs(secs));
        }
        config
    }
}

/// `[tiers]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileTiers {
    /// Highest Fast score.
    pub fast_max_score: Option<u8>,
    /// Highest Fast word count.
    pub fast_max_words: Option<usize>,
    /// Highest Shallow score.
    pub shallow_max_score: Option<u8>,
    /// Highest Shallow word count.
    pub shallow_max_words: Option<usize>,
    /// Output tokens of Shallow calls.
    pub shallow_max_tokens: Option<u32>,
    /// Output tokens of Deep calls.
    pub deep_max_tokens: Option<u32>,
}

impl ConfigFileTiers {
    pub(super) fn apply(self, config: &mut CoordinatorConfig) -> Result<()> {
        let mut tiers = config.tiers;
        if let Some(v) = self.fast_max_score {
            tiers.fast_max_score = v;
        }
        if let Some(v) = self.fast_max_words {
            tiers.fast_max_words = v;
        }
        if let Some(v) = self.shallow_max_score {
            tiers.shallow_max_score = v;
        }
        if let Some(v) = self.shallow_max_words {
            tiers.shallow_max_words = v;
        }
        if tiers.fast_max_score > tiers.shallow_max_score
            || tiers.fast_max_words > tiers.shallow_max_words
            || tiers.shallow_max_score > MAX_SCORE
        {
            return Err(Error::InvalidInput(format!(
                "tier thresholds must satisfy fast <= shallow <= {MAX_SCORE}: {tiers:?}"
            )));
        }

        let mut budgets = config.budgets;
        if let Some(v) = self.shallow_max_tokens {
            budgets.shallow_max_tokens = v.max(1);
        }
        if let Some(v) = self.deep_max_tokens {
            budgets.deep_max_tokens = v.max(1);
        }
        config.tiers = tiers;
        config.budgets = budgets;
        Ok(())
    }
}

/// `[logging]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// Filter directives, e.g. `"info,extractd=debug"`.
    pub filter: Option<String>,
    /// `"pretty"` or `"json"`.
    pub format: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<String>,
}

impl ConfigFileLogging {
    pub(super) fn apply(self, mut logging: LoggingConfig) -> LoggingConfig {
        if let Some(filter) = self.filter {
            logging.filter = filter;
        }
        if let Some(format) = self.format {
            logging.format = LogFormat::parse(&format);
        }
        if let Some(file) = self.file {
            logging.file = Some(PathBuf::from(file));
        }
        logging
    }
}

/// `[metrics]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileMetrics {
    /// Install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Listener port.
    pub port: Option<u16>,
}

impl ConfigFileMetrics {
    pub(super) fn apply(self, mut metrics: MetricsConfig) -> MetricsConfig {
        if let Some(enabled) = self.enabled {
            metrics.enabled = enabled;
        }
        if let Some(port) = self.port {
            metrics = metrics.with_port(port);
        }
        metrics
    }
}
