//! Chaos testing for concurrent submissions.
//!
//! Hammers one coordinator from many threads and checks the concurrency
//! bounds hold under load:
//! - At most one Deep call in flight
//! - Backend calls never exceed the connection pool
//! - Background work stays inside its lane
//! - Identical requests share one backend call
//! - Callers never wait past their timeout budget

// Chaos tests use expect/unwrap/panic for simplicity - panics are acceptable in tests
// Excessive nesting is acceptable in concurrent test code with thread spawns
// Needless collect is sometimes needed for clearer concurrent test structure
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::excessive_nesting,
    clippy::needless_collect
)]

use extractd::backend::{
    BackendClientConfig, BackendError, ChatRequest, FnTransport, HealthConfig, PoolConfig,
};
use extractd::coordinator::{CoordinatorConfig, CoordinatorService};
use extractd::models::{ErrorKind, ExtractionOutcome, Request, RequestKind, Tier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

const REPLY: &str = r#"{"events": [{"type": "life_event", "topic": "family dinner"}], "intent": "statement"}"#;

const DEEP_BASE: &str = "my sister and her husband argued with our landlord about the broken \
    heater and the rent increase while everyone was sitting around waiting for";

const SHALLOW_BASE: &str = "my sister argued with our landlord about the rent";

const DAYS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "tomorrow",
];

/// Tracks how many calls are inside the backend at once.
#[derive(Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fast_backend(max_concurrent: usize) -> BackendClientConfig {
    BackendClientConfig::default()
        .with_max_retries(0)
        .with_pool(PoolConfig::default().with_max_concurrent(max_concurrent))
        .with_health(HealthConfig::default().with_enabled(false))
}

/// Service whose backend holds each matching call for `hold`.
fn slow_service(
    backend: BackendClientConfig,
    coordinator: CoordinatorConfig,
    hold: Duration,
    tracked: fn(&str) -> bool,
) -> (Arc<CoordinatorService>, Arc<Occupancy>) {
    let occupancy = Arc::new(Occupancy::default());
    let seen = Arc::clone(&occupancy);
    let transport = FnTransport::new("slow", move |request: &ChatRequest, _| {
        let track = tracked(request.prompt());
        if track {
            seen.enter();
        }
        thread::sleep(hold);
        if track {
            seen.leave();
        }
        Ok(REPLY.to_string())
    });
    let service = CoordinatorService::builder(Arc::new(transport))
        .backend(backend)
        .coordinator(coordinator)
        .build()
        .expect("coordinator should start");
    (Arc::new(service), occupancy)
}

/// Submits every request from its own thread, all released together.
fn submit_all(service: &Arc<CoordinatorService>, requests: Vec<Request>) -> Vec<ExtractionOutcome> {
    let barrier = Arc::new(Barrier::new(requests.len()));
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let service = Arc::clone(service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service.submit(&request)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("submitting thread panicked"))
        .collect()
}

#[test]
fn test_deep_calls_never_overlap() {
    let config = CoordinatorConfig::default()
        .with_worker_threads(6)
        .with_deep_limits(Duration::from_secs(120), 100);
    let (service, occupancy) = slow_service(
        fast_backend(4),
        config,
        Duration::from_millis(50),
        |prompt| prompt.starts_with("COMPREHENSIVE ANALYSIS"),
    );

    let requests = ["dinner", "lunch", "breakfast", "dessert", "supper"]
        .iter()
        .map(|meal| Request::new("alice", format!("{DEEP_BASE} {meal}"), RequestKind::UserInput))
        .collect();
    let outcomes = submit_all(&service, requests);

    assert!(outcomes.iter().all(|o| o.tier_used() == Some(Tier::Deep)));
    assert_eq!(occupancy.calls(), 5);
    assert_eq!(occupancy.peak(), 1);
}

#[test]
fn test_backend_calls_stay_within_pool() {
    let config = CoordinatorConfig::default().with_worker_threads(8);
    let (service, occupancy) =
        slow_service(fast_backend(2), config, Duration::from_millis(40), |_| true);

    let requests = DAYS
        .iter()
        .map(|day| {
            Request::new("alice", format!("{SHALLOW_BASE} on {day}"), RequestKind::UserInput)
        })
        .collect();
    let outcomes = submit_all(&service, requests);

    assert!(outcomes.iter().all(ExtractionOutcome::is_success));
    assert_eq!(occupancy.calls(), DAYS.len());
    assert!(occupancy.peak() <= 2, "peak {}", occupancy.peak());
    assert_eq!(service.circuit_health().pool.in_use, 0);
}

#[test]
fn test_background_work_stays_in_its_lane() {
    let config = CoordinatorConfig::default()
        .with_worker_threads(6)
        .with_background_concurrency(1);
    let (service, occupancy) =
        slow_service(fast_backend(4), config, Duration::from_millis(30), |_| true);

    let requests = DAYS[..4]
        .iter()
        .map(|day| {
            Request::new("alice", format!("{SHALLOW_BASE} on {day}"), RequestKind::Background)
        })
        .collect();
    let outcomes = submit_all(&service, requests);

    assert!(outcomes.iter().all(ExtractionOutcome::is_success));
    assert_eq!(occupancy.peak(), 1);
}

#[test]
fn test_identical_requests_share_one_call() {
    let config = CoordinatorConfig::default().with_worker_threads(4);
    let (service, occupancy) =
        slow_service(fast_backend(4), config, Duration::from_millis(100), |_| true);

    let requests = (0..8)
        .map(|_| {
            Request::new("alice", format!("{SHALLOW_BASE} yesterday"), RequestKind::UserInput)
        })
        .collect();
    let outcomes = submit_all(&service, requests);

    assert!(outcomes.iter().all(ExtractionOutcome::is_success));
    assert_eq!(occupancy.calls(), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.cache_hit()).count(), 1);

    let metrics = service.metrics();
    assert_eq!(metrics.total_requests, 8);
    assert_eq!(metrics.cache_hits + metrics.deduplicated, 7);
}

#[test]
fn test_caller_never_waits_past_its_budget() {
    let transport = FnTransport::new("stalled", |_: &ChatRequest, timeout: Duration| {
        thread::sleep(timeout);
        Err(BackendError::Timeout(timeout))
    });
    let service = CoordinatorService::builder(Arc::new(transport))
        .backend(fast_backend(2))
        .build()
        .expect("coordinator should start");

    let request = Request::new("alice", format!("{SHALLOW_BASE} yesterday"), RequestKind::UserInput)
        .with_timeout(Duration::from_millis(200));
    let started = Instant::now();
    let outcome = service.submit(&request);

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
}

#[test]
fn test_mixed_load_always_answers() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let transport = FnTransport::new("flaky", move |_: &ChatRequest, _| {
        thread::sleep(Duration::from_millis(5));
        if counter.fetch_add(1, Ordering::SeqCst) % 3 == 0 {
            Err(BackendError::Status {
                status: 400,
                body: "rejected".to_string(),
            })
        } else {
            Ok(REPLY.to_string())
        }
    });
    let service = Arc::new(
        CoordinatorService::builder(Arc::new(transport))
            .backend(fast_backend(3))
            .coordinator(CoordinatorConfig::default().with_worker_threads(4))
            .build()
            .expect("coordinator should start"),
    );

    let num_threads = 8;
    let per_thread = 12;
    let completed = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let service = Arc::clone(&service);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let (text, kind) = match i % 4 {
                        0 => ("hello".to_string(), RequestKind::UserInput),
                        1 => ("I went to starbucks earlier".to_string(), RequestKind::UserInput),
                        2 => (
                            format!("{SHALLOW_BASE} on {}", DAYS[(t + i) % DAYS.len()]),
                            RequestKind::ConsciousnessModule,
                        ),
                        _ => (
                            format!("{SHALLOW_BASE} on {}", DAYS[t % DAYS.len()]),
                            RequestKind::Background,
                        ),
                    };
                    let owner = format!("owner-{}", t % 3);
                    let outcome = service.submit(&Request::new(owner, text, kind));
                    if let Some(kind) = outcome.error_kind() {
                        assert!(
                            matches!(kind, ErrorKind::Rejected | ErrorKind::CircuitOpen),
                            "unexpected failure {kind:?}"
                        );
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(completed.load(Ordering::SeqCst), num_threads * per_thread);
    let metrics = service.metrics();
    assert_eq!(metrics.total_requests, (num_threads * per_thread) as u64);
    assert!(metrics.fast_count >= (num_threads * per_thread / 2) as u64);
    assert_eq!(service.circuit_health().pool.in_use, 0);
}
