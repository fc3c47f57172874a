//! Coordinator-level request statistics.

use crate::models::{ExtractionOutcome, Tier};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Weight of the newest sample in the latency average.
const LATENCY_ALPHA: f64 = 0.1;

/// How a submission was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    /// Rejected because the coordinator is closed.
    Closed,
    /// Served from the result cache.
    Cache,
    /// Small talk.
    Casual,
    /// A pattern rule matched.
    Pattern,
    /// Fast tier selected and no rule matched.
    FastMiss,
    /// Reused an identical in-flight request.
    Coalesced,
    /// Dispatched to the backend.
    Backend,
}

impl Path {
    /// Returns the path as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Cache => "cache",
            Self::Casual => "casual",
            Self::Pattern => "pattern",
            Self::FastMiss => "fast_miss",
            Self::Coalesced => "coalesced",
            Self::Backend => "backend",
        }
    }
}

/// Point-in-time coordinator statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Submissions seen.
    pub total_requests: u64,
    /// Submissions served from the result cache.
    pub cache_hits: u64,
    /// `cache_hits / total_requests`, zero before the first request.
    pub cache_hit_rate: f64,
    /// Submissions handled at Fast tier.
    pub fast_count: u64,
    /// Submissions handled at Shallow tier.
    pub shallow_count: u64,
    /// Submissions handled at Deep tier.
    pub deep_count: u64,
    /// Exponential moving average of submission latency.
    pub avg_latency_ms: f64,
    /// Submissions that ended in `Failure`.
    pub error_count: u64,
    /// Submissions that ended in `Degraded`.
    pub degraded_count: u64,
    /// Submissions that reused an in-flight request.
    pub deduplicated: u64,
    /// Deep requests downgraded to Shallow by the rate limiter.
    pub downgrades: u64,
}

/// Lock-free coordinator counters.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    total: AtomicU64,
    cache_hits: AtomicU64,
    tiers: [AtomicU64; 3],
    latency_bits: AtomicU64,
    errors: AtomicU64,
    degraded: AtomicU64,
    deduplicated: AtomicU64,
    downgrades: AtomicU64,
}

const fn tier_index(tier: Tier) -> usize {
    match tier {
        Tier::Fast => 0,
        Tier::Shallow => 1,
        Tier::Deep => 2,
    }
}

impl CoordinatorMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished submission.
    pub fn record(
        &self,
        path: Path,
        tier: Option<Tier>,
        outcome: &ExtractionOutcome,
        latency: Duration,
    ) {
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        match path {
            Path::Cache => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
            },
            Path::Coalesced => {
                self.deduplicated.fetch_add(1, Ordering::Relaxed);
            },
            _ => {},
        }
        if let Some(tier) = tier {
            self.tiers[tier_index(tier)].fetch_add(1, Ordering::Relaxed);
        }
        match outcome {
            ExtractionOutcome::Failure { .. } => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            },
            ExtractionOutcome::Degraded { .. } => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
            },
            ExtractionOutcome::Success { .. } => {},
        }

        let sample = latency.as_secs_f64() * 1000.0;
        let _ = self
            .latency_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let average = if total == 1 {
                    sample
                } else {
                    f64::from_bits(bits).mul_add(1.0 - LATENCY_ALPHA, sample * LATENCY_ALPHA)
                };
                Some(average.to_bits())
            });

        metrics::counter!(
            "extractd_requests_total",
            "path" => path.as_str(),
            "status" => outcome.status_label()
        )
        .increment(1);
        metrics::histogram!("extractd_request_duration_ms", "path" => path.as_str())
            .record(sample);
    }

    /// Records a rate-limit downgrade.
    pub fn record_downgrade(&self) {
        self.downgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests,
            cache_hits,
            cache_hit_rate: if total_requests == 0 {
                0.0
            } else {
                cache_hits as f64 / total_requests as f64
            },
            fast_count: self.tiers[0].load(Ordering::Relaxed),
            shallow_count: self.tiers[1].load(Ordering::Relaxed),
            deep_count: self.tiers[2].load(Ordering::Relaxed),
            avg_latency_ms: f64::from_bits(self.latency_bits.load(Ordering::Relaxed)),
            error_count: self.errors.load(Ordering::Relaxed),
            degraded_count: self.degraded.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            downgrades: self.downgrades.load(Ordering::Relaxed),
        }
    }
}
