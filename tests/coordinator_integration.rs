//! Coordinator integration tests.
//!
//! Drives [`CoordinatorService`] end to end against scripted backends:
//! - Fast-path answers (small talk, pattern rules, Fast-tier misses)
//! - Shallow and Deep dispatch with prompt and budget selection
//! - Caching, invalidation and Deep-tier rate limiting
//! - Failure reporting, circuit handling and shutdown

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use extractd::backend::{
    BackendClientConfig, BackendError, ChatRequest, CircuitConfig, CircuitState, FnTransport,
    HealthConfig,
};
use extractd::coordinator::{CoordinatorConfig, CoordinatorService};
use extractd::models::{
    CASUAL_INTENT, CONVERSATION_CONTEXT_KEY, DegradedReason, ErrorKind, EventStatus,
    ExtractionOutcome, Request, RequestKind, Tier,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SHALLOW_TEXT: &str = "my sister argued with our landlord about the rent yesterday";

const DEEP_TEXT: &str = "my sister and her husband argued with our landlord about the broken \
    heater and the rent increase while everyone was sitting around waiting for dinner";

const SHALLOW_REPLY: &str = r#"{"events": [{"type": "life_event", "topic": "rent dispute", "people": ["sister"], "status": "past"}], "intent": "statement", "emotion": "stressed", "keywords": ["rent", "landlord"]}"#;

/// Records every prompt the backend receives.
#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
    prompts: Mutex<Vec<(String, u32)>>,
}

impl Recorder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompts(&self) -> Vec<(String, u32)> {
        self.prompts.lock().unwrap().clone()
    }
}

fn backend_config() -> BackendClientConfig {
    BackendClientConfig::default()
        .with_max_retries(1)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
        .with_health(HealthConfig::default().with_enabled(false))
}

fn scripted<F>(coordinator: CoordinatorConfig, reply: F) -> (CoordinatorService, Arc<Recorder>)
where
    F: Fn(&str) -> Result<String, BackendError> + Send + Sync + 'static,
{
    scripted_with(backend_config(), coordinator, reply)
}

fn scripted_with<F>(
    backend: BackendClientConfig,
    coordinator: CoordinatorConfig,
    reply: F,
) -> (CoordinatorService, Arc<Recorder>)
where
    F: Fn(&str) -> Result<String, BackendError> + Send + Sync + 'static,
{
    let recorder = Arc::new(Recorder::default());
    let seen = Arc::clone(&recorder);
    let transport = FnTransport::new("scripted", move |request: &ChatRequest, _| {
        seen.calls.fetch_add(1, Ordering::SeqCst);
        seen.prompts
            .lock()
            .unwrap()
            .push((request.prompt().to_string(), request.max_tokens));
        reply(request.prompt())
    });
    let service = CoordinatorService::builder(Arc::new(transport))
        .backend(backend)
        .coordinator(coordinator)
        .build()
        .expect("coordinator should start");
    (service, recorder)
}

fn user(text: &str) -> Request {
    Request::new("alice", text, RequestKind::UserInput)
}

mod fast_path {
    use super::*;

    #[test]
    fn test_known_place_visit_needs_no_backend() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        let outcome = service.submit(&user("I went to mcdonald earlier"));

        assert!(outcome.is_success());
        assert_eq!(outcome.tier_used(), Some(Tier::Fast));
        let event = outcome
            .facts()
            .and_then(|f| f.primary_event())
            .expect("visit event");
        assert_eq!(event.location.as_deref(), Some("McDonald's"));
        assert_eq!(event.time_reference.as_deref(), Some("earlier"));
        assert_eq!(event.status, EventStatus::Past);
        assert_eq!(recorder.calls(), 0);
    }

    #[test]
    fn test_small_talk_is_casual() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        for text in ["hello", "How are you doing today?", "sounds good"] {
            let outcome = service.submit(&user(text));
            let facts = outcome.facts().expect("casual facts");
            assert!(facts.events.is_empty(), "{text}");
            assert_eq!(facts.intent, CASUAL_INTENT);
            assert_eq!(outcome.tier_used(), Some(Tier::Fast));
        }
        assert_eq!(recorder.calls(), 0);
    }

    #[test]
    fn test_fast_tier_miss_degrades_without_backend() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        let outcome = service.submit(&user("the weather seems nice"));

        assert!(matches!(
            outcome,
            ExtractionOutcome::Degraded {
                reason: DegradedReason::NoPatternMatch,
                ..
            }
        ));
        let partial = outcome.facts().expect("minimal facts");
        assert_eq!(partial.keywords, vec!["the", "weather", "seems"]);
        assert!(partial.events.is_empty());
        assert_eq!(recorder.calls(), 0);
    }
}

mod backend_path {
    use super::*;

    #[test]
    fn test_shallow_request_uses_shallow_prompt_and_budget() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        let outcome = service.submit(&user(SHALLOW_TEXT));

        assert_eq!(outcome.tier_used(), Some(Tier::Shallow));
        let facts = outcome.facts().expect("facts");
        assert_eq!(facts.events[0].topic, "rent dispute");
        assert_eq!(facts.events[0].people, vec!["sister"]);
        assert_eq!(facts.emotion.primary, "stressed");

        let prompts = recorder.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.starts_with("Extract from:"));
        assert!(!prompts[0].0.contains("COMPREHENSIVE ANALYSIS"));
        assert_eq!(prompts[0].1, 256);
    }

    #[test]
    fn test_deep_request_carries_conversation_snippet() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));
        let conversation = format!("{}TAIL", "a".repeat(100));

        let outcome = service.submit(&user(DEEP_TEXT).with_context(
            CONVERSATION_CONTEXT_KEY,
            conversation,
        ));

        assert_eq!(outcome.tier_used(), Some(Tier::Deep));
        let prompts = recorder.prompts();
        assert!(prompts[0].0.starts_with("COMPREHENSIVE ANALYSIS"));
        assert!(prompts[0].0.contains(&format!("Context: {}...", "a".repeat(100))));
        assert!(!prompts[0].0.contains("TAIL"));
        assert_eq!(prompts[0].1, 1024);
    }

    #[test]
    fn test_unparseable_output_degrades() {
        let (service, _) = scripted(CoordinatorConfig::default(), |_| {
            Ok("Sure! The user talked about rent.".to_string())
        });

        let outcome = service.submit(&user(SHALLOW_TEXT));

        assert!(matches!(
            outcome,
            ExtractionOutcome::Degraded {
                reason: DegradedReason::UnparseableOutput,
                ..
            }
        ));
    }

    #[test]
    fn test_unparseable_repeat_makes_one_backend_call() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok("no json here".to_string()));

        let first = service.submit(&user(SHALLOW_TEXT));
        let second = service.submit(&user(SHALLOW_TEXT));

        assert_eq!(first.status_label(), "degraded");
        assert_eq!(second.status_label(), "degraded");
        assert!(!first.cache_hit());
        assert!(second.cache_hit());
        assert_eq!(recorder.calls(), 1);

        let metrics = service.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.degraded_count, 2);
    }

    #[test]
    fn test_fenced_output_with_trailing_commas_parses() {
        let (service, _) = scripted(CoordinatorConfig::default(), |_| {
            Ok("```json\n{\"events\": [{\"topic\": \"rent dispute\",},], \"keywords\": [\"rent\",],}\n```"
                .to_string())
        });

        let outcome = service.submit(&user(SHALLOW_TEXT));

        assert!(outcome.is_success());
        assert_eq!(outcome.facts().map(|f| f.keywords.clone()), Some(vec!["rent".to_string()]));
    }
}

mod caching {
    use super::*;

    #[test]
    fn test_repeat_is_served_from_cache() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        let first = service.submit(&user(SHALLOW_TEXT));
        let second = service.submit(&user(&format!("  {}  ", SHALLOW_TEXT.to_uppercase())));

        assert!(!first.cache_hit());
        assert!(second.cache_hit());
        assert_eq!(first.facts(), second.facts());
        assert_eq!(recorder.calls(), 1);

        let metrics = service.metrics();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.cache_hits, 1);
        assert!((metrics.cache_hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(metrics.shallow_count, 2);
    }

    #[test]
    fn test_other_owner_does_not_share_cache() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        let _ = service.submit(&user(SHALLOW_TEXT));
        let other = service.submit(&Request::new("bob", SHALLOW_TEXT, RequestKind::UserInput));

        assert!(!other.cache_hit());
        assert_eq!(recorder.calls(), 2);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let (service, recorder) = scripted(CoordinatorConfig::default(), |_| {
            Err(BackendError::Status {
                status: 400,
                body: "bad request".to_string(),
            })
        });

        let first = service.submit(&user(SHALLOW_TEXT));
        let second = service.submit(&user(SHALLOW_TEXT));

        assert_eq!(first.error_kind(), Some(ErrorKind::Rejected));
        assert_eq!(second.error_kind(), Some(ErrorKind::Rejected));
        assert_eq!(recorder.calls(), 2);
        assert_eq!(service.metrics().error_count, 2);
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));
        let request = user(SHALLOW_TEXT);

        let _ = service.submit(&request);
        assert!(service.invalidate_request(&request));
        assert!(!service.invalidate_request(&request));
        let again = service.submit(&request);

        assert!(!again.cache_hit());
        assert_eq!(recorder.calls(), 2);
    }
}

mod deep_limits {
    use super::*;

    #[test]
    fn test_repeated_deep_key_is_downgraded() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));
        let request = user(DEEP_TEXT);

        let first = service.submit(&request);
        assert_eq!(first.tier_used(), Some(Tier::Deep));

        service.invalidate_request(&request);
        let second = service.submit(&request);
        assert_eq!(second.tier_used(), Some(Tier::Shallow));

        let prompts = recorder.prompts();
        assert!(prompts[0].0.starts_with("COMPREHENSIVE ANALYSIS"));
        assert!(prompts[1].0.starts_with("Extract from:"));
        assert_eq!(service.metrics().downgrades, 1);
    }

    #[test]
    fn test_global_deep_budget_downgrades_other_keys() {
        let config = CoordinatorConfig::default().with_deep_limits(Duration::from_secs(120), 1);
        let (service, _) = scripted(config, |_| Ok(SHALLOW_REPLY.to_string()));

        let first = service.submit(&user(DEEP_TEXT));
        let second = service.submit(&user(&DEEP_TEXT.replace("dinner", "lunch")));

        assert_eq!(first.tier_used(), Some(Tier::Deep));
        assert_eq!(second.tier_used(), Some(Tier::Shallow));
        assert_eq!(service.metrics().deep_count, 1);
    }
}

mod resilience {
    use super::*;

    fn background(text: &str) -> Request {
        Request::new("alice", text, RequestKind::Background)
    }

    #[test]
    fn test_open_circuit_fails_fast_until_reset() {
        let backend = backend_config()
            .with_circuit(CircuitConfig::default().with_failure_threshold(1));
        let (service, recorder) = scripted_with(backend, CoordinatorConfig::default(), |_| {
            Err(BackendError::Malformed("not a completion".to_string()))
        });

        let first = service.submit(&background(SHALLOW_TEXT));
        assert_eq!(first.error_kind(), Some(ErrorKind::MalformedResponse));
        assert_eq!(service.circuit_health().state, CircuitState::Open);

        let second = service.submit(&background(SHALLOW_TEXT));
        assert_eq!(second.error_kind(), Some(ErrorKind::CircuitOpen));
        assert_eq!(recorder.calls(), 1);

        service.force_reset();
        assert_eq!(service.circuit_health().state, CircuitState::Closed);
    }

    #[test]
    fn test_open_circuit_gives_interactive_callers_minimal_facts() {
        let backend = backend_config()
            .with_circuit(CircuitConfig::default().with_failure_threshold(1));
        let (service, recorder) = scripted_with(backend, CoordinatorConfig::default(), |_| {
            Err(BackendError::Malformed("not a completion".to_string()))
        });

        let first = service.submit(&user(SHALLOW_TEXT));
        assert_eq!(first.error_kind(), Some(ErrorKind::MalformedResponse));

        let second = service.submit(&user(SHALLOW_TEXT));
        assert!(matches!(
            second,
            ExtractionOutcome::Degraded {
                reason: DegradedReason::BackendUnavailable(ErrorKind::CircuitOpen),
                ..
            }
        ));
        let partial = second.facts().expect("minimal facts");
        assert!(partial.keywords.contains(&"sister".to_string()));
        assert_eq!(recorder.calls(), 1);
        assert_eq!(service.circuit_health().state, CircuitState::Open);
    }

    #[test]
    fn test_transient_failure_is_retried_transparently() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let (service, recorder) = scripted(CoordinatorConfig::default(), move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BackendError::Incomplete("stream ended early".to_string()))
            } else {
                Ok(SHALLOW_REPLY.to_string())
            }
        });

        let outcome = service.submit(&user(SHALLOW_TEXT));

        assert!(outcome.is_success());
        assert_eq!(recorder.calls(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_closed_service_reports_shutting_down() {
        let (service, recorder) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        service.close();
        assert!(service.is_closed());

        for text in [SHALLOW_TEXT, "hello", "I went to mcdonald earlier"] {
            assert_eq!(
                service.submit(&user(text)).error_kind(),
                Some(ErrorKind::ShuttingDown)
            );
        }
        assert_eq!(recorder.calls(), 0);

        service.close();
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let (service, _) =
            scripted(CoordinatorConfig::default(), |_| Ok(SHALLOW_REPLY.to_string()));

        let outcome = service.submit(&user("I went to mcdonald earlier"));
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["tier_used"], "fast");
        assert_eq!(json["cache_hit"], false);
    }
}
