//! Structured logging configuration.

use std::path::PathBuf;

/// Filter used when neither configuration nor environment sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything but `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directives.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies `EXTRACTD_LOG` (falling back to `RUST_LOG`),
    /// `EXTRACTD_LOG_FORMAT` and `EXTRACTD_LOG_FILE`.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(filter) = get("EXTRACTD_LOG").or_else(|| get("RUST_LOG")) {
            self.filter = filter;
        }
        if let Some(format) = get("EXTRACTD_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
        if let Some(file) = get("EXTRACTD_LOG_FILE") {
            self.file = Some(PathBuf::from(file.trim()));
        }
        self
    }

    /// Raises the filter to `debug` for `-v` style flags.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.filter = "debug".to_string();
        }
        self
    }
}
