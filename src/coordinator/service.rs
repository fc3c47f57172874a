//! The coordinator service.
//!
//! Every submission walks the same ladder and stops at the first rung that
//! produces an outcome:
//!
//! ```text
//! closed? ─► cache ─► small talk ─► pattern rules ─► classify
//!                                                      │
//!             Fast: degraded, no backend ◄─────────────┤
//!                                                      ▼
//!        in-flight claim ─► deep limiter ─► worker: lane ─► deep gate ─► backend
//! ```
//!
//! Cache, small-talk and pattern work runs on the caller's thread. Backend
//! work runs on a bounded pool of blocking workers; the caller waits at most
//! its timeout budget and cancels the worker's deadline when it gives up.

use super::{
    ActivityTracker, ContinuationMatcher, CoordinatorConfig, CoordinatorMetrics, DeepAdmission,
    DeepTierGate, DeepTierLimiter, MetricsSnapshot, Path, derive_priority,
};
use crate::backend::{
    BackendClient, BackendClientConfig, BackendTransport, CircuitHealth, HttpTransport,
    PoolConfig, Slot, SlotPool,
};
use crate::cache::{CacheKey, Claim, InflightRegistry, LeaderGuard, ResultCache, ResultCacheConfig};
use crate::config::ExtractdConfig;
use crate::extraction::{
    ComplexityClassifier, PatternRuleSet, PromptBuilder, TieredPromptBuilder, is_casual,
    parse_model_output,
};
use crate::models::{
    Deadline, DegradedReason, ErrorKind, ExtractionOutcome, Facts, Priority, Request, RequestKind,
    Tier,
};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

/// How long `close` waits for running workers outside an async context.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Shortest background tick.
const MIN_TICK: Duration = Duration::from_millis(10);

/// State shared between callers, workers and background tasks.
struct Shared {
    config: CoordinatorConfig,
    backend: BackendClient,
    cache: ResultCache,
    dedup_window: Duration,
    inflight: InflightRegistry,
    classifier: ComplexityClassifier,
    rules: PatternRuleSet,
    prompts: Box<dyn PromptBuilder>,
    activity: ActivityTracker,
    continuation: ContinuationMatcher,
    limiter: DeepTierLimiter,
    gate: DeepTierGate,
    background_lane: SlotPool,
    metrics: CoordinatorMetrics,
}

/// Backend work handed to a worker.
struct Job {
    key: CacheKey,
    text: String,
    prompt: String,
    tier: Tier,
    priority: Priority,
}

impl Shared {
    /// Runs one backend job. Never panics; every path yields an outcome.
    fn execute(&self, job: &Job, deadline: &Deadline) -> ExtractionOutcome {
        if deadline.is_expired() {
            return ExtractionOutcome::failure(ErrorKind::Timeout);
        }

        let _lane: Option<Slot> = if job.priority.is_interactive() {
            None
        } else {
            match self.background_lane.acquire(deadline.remaining()) {
                Ok(slot) => Some(slot),
                Err(_) => return ExtractionOutcome::failure(ErrorKind::Timeout),
            }
        };

        let _gate: Option<Slot> = if job.tier == Tier::Deep {
            match self.gate.enter(deadline) {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Timed out waiting for the deep-tier gate");
                    return ExtractionOutcome::failure(ErrorKind::Timeout);
                },
            }
        } else {
            None
        };

        let max_tokens = self.config.budgets.budget(job.tier);
        match self.backend.call_until(&job.prompt, max_tokens, deadline) {
            Ok(text) => parse_model_output(&text).map_or_else(
                || {
                    tracing::warn!(
                        tier = job.tier.as_str(),
                        response_len = text.len(),
                        "Backend output could not be parsed"
                    );
                    let outcome = ExtractionOutcome::degraded(
                        Facts::minimal(&job.text),
                        DegradedReason::UnparseableOutput,
                    );
                    // Held only for the dedup window so repeats skip the backend.
                    self.cache
                        .put_with_ttl(job.key.clone(), outcome.clone(), self.dedup_window);
                    outcome
                },
                |facts| {
                    let outcome = ExtractionOutcome::success(facts, job.tier);
                    self.cache.put(job.key.clone(), outcome.clone());
                    outcome
                },
            ),
            Err(err) => {
                let kind = if deadline.is_expired() {
                    ErrorKind::Timeout
                } else {
                    err.kind()
                };
                tracing::warn!(error = %err, kind = kind.as_str(), "Backend call failed");
                if job.priority.is_interactive() && refused_admission(kind) {
                    ExtractionOutcome::degraded(
                        Facts::minimal(&job.text),
                        DegradedReason::BackendUnavailable(kind),
                    )
                } else {
                    ExtractionOutcome::failure(kind)
                }
            },
        }
    }

    fn maintain(&self) {
        let swept = self.cache.sweep();
        let stale = self.inflight.purge_stale();
        let reclaimed = self.backend.reclaim_stuck_slots();
        let idle = self.activity.purge();
        let expired_windows = self.limiter.purge(Instant::now());
        tracing::debug!(
            swept,
            stale,
            reclaimed,
            idle,
            expired_windows,
            "Maintenance pass"
        );
    }
}

/// Failures where the backend never took the call.
const fn refused_admission(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::CircuitOpen | ErrorKind::Unavailable | ErrorKind::QueueTimeout
    )
}

/// Builder for [`CoordinatorService`].
pub struct CoordinatorBuilder {
    transport: Arc<dyn BackendTransport>,
    backend: BackendClientConfig,
    cache: ResultCacheConfig,
    coordinator: CoordinatorConfig,
    rules: PatternRuleSet,
    prompts: Box<dyn PromptBuilder>,
}

impl CoordinatorBuilder {
    /// Sets the backend client configuration.
    #[must_use]
    pub fn backend(mut self, config: BackendClientConfig) -> Self {
        self.backend = config;
        self
    }

    /// Sets the cache configuration.
    #[must_use]
    pub fn cache(mut self, config: ResultCacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Sets the coordinator configuration.
    #[must_use]
    pub fn coordinator(mut self, config: CoordinatorConfig) -> Self {
        self.coordinator = config;
        self
    }

    /// Replaces the pattern rules.
    #[must_use]
    pub fn rules(mut self, rules: PatternRuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Replaces the prompt builder.
    #[must_use]
    pub fn prompts(mut self, prompts: impl PromptBuilder + 'static) -> Self {
        self.prompts = Box::new(prompts);
        self
    }

    /// Starts the worker runtime and background tasks.
    pub fn build(self) -> Result<CoordinatorService> {
        let config = self.coordinator;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads.max(1))
            .thread_name("extractd-worker")
            .enable_all()
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "coordinator_runtime_init".to_string(),
                cause: e.to_string(),
            })?;

        let lane = PoolConfig::default()
            .with_max_concurrent(config.background_concurrency)
            .with_stuck_after(None);
        let shared = Arc::new(Shared {
            backend: BackendClient::new(self.transport, self.backend),
            cache: ResultCache::from_config(&self.cache),
            dedup_window: self.cache.dedup_window,
            inflight: InflightRegistry::new(self.cache.dedup_window),
            classifier: ComplexityClassifier::new(config.tiers),
            rules: self.rules,
            prompts: self.prompts,
            activity: ActivityTracker::new(config.activity_window),
            continuation: ContinuationMatcher::new(&config.continuation_keywords),
            limiter: DeepTierLimiter::new(config.deep_key_window, config.deep_global_per_minute),
            gate: DeepTierGate::new(),
            background_lane: SlotPool::new("background_lane", lane),
            metrics: CoordinatorMetrics::new(),
            config,
        });
        spawn_background(&runtime, &shared);

        tracing::info!(
            transport = shared.backend.transport_name(),
            worker_threads = shared.config.worker_threads,
            rules = shared.rules.len(),
            "Coordinator started"
        );
        Ok(CoordinatorService {
            shared,
            runtime: Mutex::new(Some(runtime)),
            closed: AtomicBool::new(false),
        })
    }
}

fn spawn_background(runtime: &Runtime, shared: &Arc<Shared>) {
    let health = shared.backend.config().health.clone();
    if health.enabled {
        let shared = Arc::clone(shared);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(health.interval.max(MIN_TICK));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let probe = Arc::clone(&shared);
                match tokio::task::spawn_blocking(move || probe.backend.probe_health()).await {
                    Ok(healthy) => tracing::trace!(healthy, "Background health probe"),
                    Err(e) => tracing::warn!(error = %e, "Health probe task failed"),
                }
            }
        });
    }

    let shared = Arc::clone(shared);
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.maintenance_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing to maintain yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            shared.maintain();
        }
    });
}

/// Adaptive-depth extraction coordinator.
///
/// `submit` never panics, never returns an error and never blocks longer
/// than the request's timeout budget plus a small constant.
///
/// # Example
///
/// ```rust,no_run
/// use extractd::backend::{BackendError, ChatRequest, FnTransport};
/// use extractd::coordinator::CoordinatorService;
/// use extractd::models::{Request, RequestKind};
/// use std::sync::Arc;
///
/// let transport = FnTransport::new("local", |_: &ChatRequest, _| -> Result<String, BackendError> {
///     Ok(r#"{"events": [], "intent": "statement"}"#.to_string())
/// });
/// let service = CoordinatorService::builder(Arc::new(transport)).build()?;
/// let outcome = service.submit(&Request::new("alice", "I went to mcdonald earlier", RequestKind::UserInput));
/// assert!(outcome.is_success());
/// # Ok::<(), extractd::Error>(())
/// ```
pub struct CoordinatorService {
    shared: Arc<Shared>,
    runtime: Mutex<Option<Runtime>>,
    closed: AtomicBool,
}

impl CoordinatorService {
    /// Starts building a service over `transport` with default settings,
    /// the standard pattern rules and the tiered prompts.
    #[must_use]
    pub fn builder(transport: Arc<dyn BackendTransport>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            transport,
            backend: BackendClientConfig::default(),
            cache: ResultCacheConfig::default(),
            coordinator: CoordinatorConfig::default(),
            rules: PatternRuleSet::standard(),
            prompts: Box::new(TieredPromptBuilder),
        }
    }

    /// Creates a service from configuration and explicit collaborators.
    pub fn new(
        config: &ExtractdConfig,
        transport: Arc<dyn BackendTransport>,
        rules: PatternRuleSet,
        prompts: impl PromptBuilder + 'static,
    ) -> Result<Self> {
        Self::builder(transport)
            .backend(config.backend.clone())
            .cache(config.cache.clone())
            .coordinator(config.coordinator.clone())
            .rules(rules)
            .prompts(prompts)
            .build()
    }

    /// Creates a service talking HTTP to the configured endpoint.
    pub fn from_config(config: &ExtractdConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.transport.clone()));
        Self::new(
            config,
            transport,
            PatternRuleSet::standard(),
            TieredPromptBuilder,
        )
    }

    /// Extracts facts from `request`.
    #[instrument(
        skip(self, request),
        fields(
            request_id = request.id(),
            kind = request.kind().as_str(),
            priority = tracing::field::Empty,
            tier = tracing::field::Empty,
            path = tracing::field::Empty,
            status = tracing::field::Empty
        )
    )]
    pub fn submit(&self, request: &Request) -> ExtractionOutcome {
        let started = Instant::now();
        let (outcome, path, tier) = self.process(request);

        let span = tracing::Span::current();
        span.record("path", path.as_str());
        span.record("status", outcome.status_label());
        self.shared
            .metrics
            .record(path, tier, &outcome, started.elapsed());
        outcome
    }

    fn process(&self, request: &Request) -> (ExtractionOutcome, Path, Option<Tier>) {
        if self.is_closed() {
            return (
                ExtractionOutcome::failure(ErrorKind::ShuttingDown),
                Path::Closed,
                None,
            );
        }
        let shared = &self.shared;
        let span = tracing::Span::current();
        let text = request.text();
        let key = CacheKey::for_request(request);

        if request.kind() == RequestKind::UserInput {
            shared.activity.record(request.owner());
        }
        let priority = derive_priority(request, &shared.activity, &shared.continuation);
        span.record("priority", priority.as_str());

        if let Some(cached) = shared.cache.get(&key) {
            tracing::debug!(key = %key, "Served from cache");
            let tier = cached.tier_used();
            return (cached.into_cache_hit(), Path::Cache, tier);
        }

        if is_casual(text) {
            let outcome = ExtractionOutcome::success(Facts::casual(), Tier::Fast);
            shared.cache.put(key, outcome.clone());
            return (outcome, Path::Casual, Some(Tier::Fast));
        }

        if let Some(facts) = shared.rules.try_extract(text) {
            let outcome = ExtractionOutcome::success(facts, Tier::Fast);
            shared.cache.put(key, outcome.clone());
            return (outcome, Path::Pattern, Some(Tier::Fast));
        }

        let classification = shared.classifier.classify(text);
        span.record("tier", classification.tier.as_str());
        if classification.tier == Tier::Fast {
            let outcome =
                ExtractionOutcome::degraded(Facts::minimal(text), DegradedReason::NoPatternMatch);
            return (outcome, Path::FastMiss, Some(Tier::Fast));
        }

        let budget = request
            .timeout_budget()
            .unwrap_or(shared.config.default_timeout);
        let deadline = Deadline::after(budget);

        match shared.inflight.claim(&key) {
            Claim::Follower(follower) => {
                tracing::debug!(key = %key, "Joining identical in-flight request");
                let outcome = follower.wait(deadline.remaining()).map_or_else(
                    || ExtractionOutcome::failure(ErrorKind::Timeout),
                    ExtractionOutcome::into_cache_hit,
                );
                let tier = outcome.tier_used();
                (outcome, Path::Coalesced, tier)
            },
            Claim::Leader(leader) => {
                // Another leader may have finished between the lookup and the claim.
                if let Some(cached) = shared.cache.get(&key) {
                    leader.complete(cached.clone());
                    let tier = cached.tier_used();
                    return (cached.into_cache_hit(), Path::Cache, tier);
                }

                let tier = self.admit_tier(classification.tier, &key);
                span.record("tier", tier.as_str());
                let job = Job {
                    prompt: shared.prompts.build(request, tier),
                    text: text.to_string(),
                    key,
                    tier,
                    priority,
                };
                (self.dispatch(job, leader, &deadline), Path::Backend, Some(tier))
            },
        }
    }

    /// Applies the Deep-tier rate limits; throttled requests run Shallow.
    fn admit_tier(&self, tier: Tier, key: &CacheKey) -> Tier {
        if tier != Tier::Deep {
            return tier;
        }
        match self.shared.limiter.try_admit(key, Instant::now()) {
            DeepAdmission::Admitted => Tier::Deep,
            throttled => {
                tracing::info!(
                    key = %key,
                    reason = throttled.as_str(),
                    "Deep tier rate limited, downgrading to shallow"
                );
                metrics::counter!(
                    "extractd_tier_downgrades_total",
                    "reason" => throttled.as_str()
                )
                .increment(1);
                self.shared.metrics.record_downgrade();
                Tier::Shallow
            },
        }
    }

    /// Hands `job` to a worker and waits for it within `deadline`.
    fn dispatch(&self, job: Job, leader: LeaderGuard, deadline: &Deadline) -> ExtractionOutcome {
        let (tx, rx) = mpsc::sync_channel(1);
        {
            let runtime = self.lock_runtime();
            let Some(runtime) = runtime.as_ref() else {
                let outcome = ExtractionOutcome::failure(ErrorKind::ShuttingDown);
                leader.complete(outcome.clone());
                return outcome;
            };
            let shared = Arc::clone(&self.shared);
            let worker_deadline = deadline.clone();
            let span = tracing::Span::current();
            runtime.spawn_blocking(move || {
                let _entered = span.enter();
                let outcome = shared.execute(&job, &worker_deadline);
                leader.complete(outcome.clone());
                let _ = tx.send(outcome);
            });
        }

        match rx.recv_timeout(deadline.remaining()) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                deadline.cancel();
                tracing::warn!("Timeout budget elapsed before the backend answered");
                ExtractionOutcome::failure(ErrorKind::Timeout)
            },
            Err(RecvTimeoutError::Disconnected) => {
                if self.is_closed() {
                    ExtractionOutcome::failure(ErrorKind::ShuttingDown)
                } else {
                    tracing::error!("Worker exited without an outcome");
                    ExtractionOutcome::failure(ErrorKind::Unavailable)
                }
            },
        }
    }

    /// Coordinator statistics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Circuit breaker and backend health.
    #[must_use]
    pub fn circuit_health(&self) -> CircuitHealth {
        self.shared.backend.circuit_health()
    }

    /// Probes backend health now.
    pub fn probe_health(&self) -> bool {
        self.shared.backend.probe_health()
    }

    /// Operator escape hatch: clears stuck connection slots, rebuilds the
    /// backend session, closes the circuit and frees the background lane.
    ///
    /// The Deep-tier gate is left alone so two Deep calls never overlap.
    pub fn force_reset(&self) {
        self.shared.backend.force_reset();
        self.shared.background_lane.force_reset();
        tracing::warn!("Coordinator force reset");
    }

    /// Drops the cached outcome for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.shared.cache.invalidate(key)
    }

    /// Drops the cached outcome for `request`.
    pub fn invalidate_request(&self, request: &Request) -> bool {
        self.invalidate(&CacheKey::for_request(request))
    }

    /// Number of cached outcomes.
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.shared.cache.len()
    }

    /// True once [`CoordinatorService::close`] ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops background tasks and workers. Idempotent; later submissions
    /// return `Failure(ShuttingDown)`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let runtime = self.lock_runtime().take();
        if let Some(runtime) = runtime {
            if tokio::runtime::Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            }
        }
        tracing::info!("Coordinator closed");
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CoordinatorService {
    fn drop(&mut self) {
        self.close();
    }
}
