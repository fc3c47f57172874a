//! Coordinator configuration.

use super::DEFAULT_CONTINUATION_KEYWORDS;
use crate::extraction::{TierBudgets, TierThresholds};
use std::time::Duration;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker threads executing backend calls.
    ///
    /// Default: 3.
    pub worker_threads: usize,
    /// Normal/Low priority requests allowed at the backend at once.
    ///
    /// Default: 1.
    pub background_concurrency: usize,
    /// Budget for requests without an explicit timeout.
    ///
    /// Default: 30 seconds.
    pub default_timeout: Duration,
    /// How long an owner counts as recently active after speaking.
    ///
    /// Default: 5 minutes.
    pub activity_window: Duration,
    /// Minimum spacing of Deep runs for the same cache key.
    ///
    /// Default: 2 minutes.
    pub deep_key_window: Duration,
    /// Deep runs allowed per minute across the process.
    ///
    /// Default: 2.
    pub deep_global_per_minute: usize,
    /// Phrases marking a fusion request as a continuation.
    pub continuation_keywords: Vec<String>,
    /// Interval of cache sweeps and stuck-slot repair.
    ///
    /// Default: 60 seconds.
    pub maintenance_interval: Duration,
    /// Tier selection thresholds.
    pub tiers: TierThresholds,
    /// Output token budgets per tier.
    pub budgets: TierBudgets,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 3,
            background_concurrency: 1,
            default_timeout: Duration::from_secs(30),
            activity_window: Duration::from_secs(300),
            deep_key_window: Duration::from_secs(120),
            deep_global_per_minute: 2,
            continuation_keywords: DEFAULT_CONTINUATION_KEYWORDS
                .iter()
                .map(ToString::to_string)
                .collect(),
            maintenance_interval: Duration::from_secs(60),
            tiers: TierThresholds::default(),
            budgets: TierBudgets::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Sets the worker thread count (minimum 1).
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Sets the background lane width (minimum 1).
    #[must_use]
    pub fn with_background_concurrency(mut self, concurrency: usize) -> Self {
        self.background_concurrency = concurrency.max(1);
        self
    }

    /// Sets the default timeout budget.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the owner activity window.
    #[must_use]
    pub const fn with_activity_window(mut self, window: Duration) -> Self {
        self.activity_window = window;
        self
    }

    /// Sets the per-key Deep window and the global Deep budget.
    #[must_use]
    pub fn with_deep_limits(mut self, key_window: Duration, per_minute: usize) -> Self {
        self.deep_key_window = key_window;
        self.deep_global_per_minute = per_minute.max(1);
        self
    }

    /// Sets the maintenance interval.
    #[must_use]
    pub const fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Sets the tier thresholds.
    #[must_use]
    pub const fn with_tiers(mut self, tiers: TierThresholds) -> Self {
        self.tiers = tiers;
        self
    }

    /// Sets the token budgets.
    #[must_use]
    pub const fn with_budgets(mut self, budgets: TierBudgets) -> Self {
        self.budgets = budgets;
        self
    }
}
