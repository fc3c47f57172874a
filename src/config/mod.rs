//! Configuration management.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`~/.config/extractd/config.toml` unless given explicitly)
//! 3. `EXTRACTD_*` environment variables
//!
//! Durations are written as whole seconds (`*_secs`) or milliseconds
//! (`*_ms`) in the file.
//!
//! ```toml
//! [backend]
//! endpoint = "http://localhost:5001/v1/chat/completions"
//! model = "koboldcpp"
//!
//! [resilience]
//! max_retries = 3
//! failure_threshold = 3
//!
//! [coordinator]
//! worker_threads = 3
//! deep_global_per_minute = 2
//! ```

mod file;

pub use file::{
    ConfigFile, ConfigFileBackend, ConfigFileCache, ConfigFileCoordinator, ConfigFileHealth,
    ConfigFileLogging, ConfigFileMetrics, ConfigFilePool, ConfigFileResilience, ConfigFileTiers,
};

use crate::backend::{BackendClientConfig, HttpTransportConfig};
use crate::cache::ResultCacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::observability::{LoggingConfig, MetricsConfig};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "EXTRACTD_";

/// Full extractd configuration.
#[derive(Debug, Clone, Default)]
pub struct ExtractdConfig {
    /// HTTP transport settings.
    pub transport: HttpTransportConfig,
    /// Backend client settings: retries, circuit, pool and health.
    pub backend: BackendClientConfig,
    /// Result cache settings.
    pub cache: ResultCacheConfig,
    /// Coordinator settings.
    pub coordinator: CoordinatorConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Metrics exporter settings.
    pub metrics: MetricsConfig,
}

impl ExtractdConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`] or
    /// a value is out of range.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Path of the default configuration file, if a home directory exists.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| {
            dirs.home_dir()
                .join(".config")
                .join("extractd")
                .join("config.toml")
        })
    }

    /// Loads configuration the way the binary does: the given file, else
    /// the default file when it exists, else defaults; then environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded, or if
    /// the default file exists but is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.with_env_overrides())
    }

    /// Applies `EXTRACTD_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, which receives full variable
    /// names such as `EXTRACTD_MODEL`.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(endpoint) = get("ENDPOINT") {
            self.transport.endpoint = endpoint;
        }
        if let Some(endpoint) = get("HEALTH_ENDPOINT") {
            self.transport.health_endpoint = Some(endpoint);
        }
        if let Some(key) = get("API_KEY") {
            self.transport = self.transport.with_api_key(key);
        }
        if let Some(model) = get("MODEL") {
            self.backend.model = model;
        }
        if let Some(stream) = get("STREAM").and_then(|v| parse_bool(&v)) {
            self.backend.stream = stream;
        }
        if let Some(secs) = get("CALL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.backend.call_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = get("MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.backend.max_retries = retries;
        }
        if let Some(slots) = get("POOL_MAX_CONCURRENT").and_then(|v| v.parse::<usize>().ok()) {
            self.backend.pool.max_concurrent = slots.max(1);
        }
        if let Some(enabled) = get("HEALTH_ENABLED").and_then(|v| parse_bool(&v)) {
            self.backend.health.enabled = enabled;
        }
        if let Some(secs) = get("CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(entries) = get("CACHE_MAX_ENTRIES").and_then(|v| v.parse::<usize>().ok()) {
            self.cache.max_entries = entries.max(1);
        }
        if let Some(threads) = get("WORKER_THREADS").and_then(|v| v.parse::<usize>().ok()) {
            self.coordinator.worker_threads = threads.max(1);
        }
        if let Some(secs) = get("DEFAULT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.coordinator.default_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = get("DEEP_PER_MINUTE").and_then(|v| v.parse::<usize>().ok()) {
            self.coordinator.deep_global_per_minute = max.max(1);
        }

        self.logging = self.logging.with_overrides_from(&lookup);
        self.metrics = self.metrics.with_overrides_from(&lookup);
        self
    }

    /// Converts a parsed [`ConfigFile`] onto the defaults.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = file.backend {
            backend.apply(&mut config.transport, &mut config.backend)?;
        }
        if let Some(resilience) = file.resilience {
            config.backend = resilience.apply(config.backend);
        }
        if let Some(pool) = file.pool {
            config.backend.pool = pool.apply(config.backend.pool);
        }
        if let Some(health) = file.health {
            config.backend.health = health.apply(config.backend.health);
        }
        if let Some(cache) = file.cache {
            config.cache = cache.apply(config.cache);
        }
        if let Some(coordinator) = file.coordinator {
            config.coordinator = coordinator.apply(config.coordinator);
        }
        if let Some(tiers) = file.tiers {
            tiers.apply(&mut config.coordinator)?;
        }
        if let Some(logging) = file.logging {
            config.logging = logging.apply(config.logging);
        }
        if let Some(metrics) = file.metrics {
            config.metrics = metrics.apply(config.metrics);
        }

        Ok(config)
    }
}

/// Parses `true/1/yes/on` and `false/0/no/off`.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
