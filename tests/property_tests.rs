//! Property-based tests for the fast path.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Tier selection is monotone in score and length
//! - Complexity scores stay within bounds
//! - Normalization is idempotent and keys ignore case and spacing
//! - Very short utterances are always small talk
//! - Model output parsing never panics
//! - Fuzzy similarity is a bounded, symmetric ratio
//! - Retry backoff never exceeds its cap

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use extractd::backend::BackendClientConfig;
use extractd::cache::{CacheKey, normalize};
use extractd::extraction::fuzzy::{levenshtein, similarity};
use extractd::extraction::{
    ComplexityClassifier, MAX_SCORE, PatternRuleSet, TierThresholds, is_casual,
    parse_model_output,
};
use extractd::models::RequestKind;
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    /// Property: a higher score never selects a cheaper tier.
    #[test]
    fn prop_tier_monotone_in_score(a in 0u8..=MAX_SCORE, b in 0u8..=MAX_SCORE, words in 0usize..40) {
        let thresholds = TierThresholds::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(thresholds.select(low, words) <= thresholds.select(high, words));
    }

    /// Property: a longer text never selects a cheaper tier.
    #[test]
    fn prop_tier_monotone_in_length(score in 0u8..=MAX_SCORE, a in 0usize..60, b in 0usize..60) {
        let thresholds = TierThresholds::default();
        let (short, long) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(thresholds.select(score, short) <= thresholds.select(score, long));
    }

    /// Property: scores never exceed the cap and the tier follows the table.
    #[test]
    fn prop_classification_is_bounded(text in "\\PC{0,300}") {
        let classifier = ComplexityClassifier::default();
        let classification = classifier.classify(&text);
        prop_assert!(classification.score <= MAX_SCORE);
        prop_assert_eq!(classification.word_count, text.split_whitespace().count());
        prop_assert_eq!(
            classification.tier,
            classifier.select_tier(classification.score, classification.word_count)
        );
    }

    /// Property: normalizing twice changes nothing.
    #[test]
    fn prop_normalize_idempotent(text in "\\PC{0,200}") {
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once.clone());
        prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        prop_assert!(!once.contains("  "));
    }

    /// Property: keys ignore case and surrounding or repeated whitespace.
    #[test]
    fn prop_cache_key_ignores_case_and_spacing(
        words in prop::collection::vec("[a-zA-Z']{1,10}", 1..12),
        pad in "[ \t]{0,3}"
    ) {
        let plain = words.join(" ");
        let noisy = format!("{pad}{}{pad}", words.join("  ").to_uppercase());
        prop_assert_eq!(
            CacheKey::new("alice", &plain, RequestKind::UserInput),
            CacheKey::new("alice", &noisy, RequestKind::UserInput)
        );
        prop_assert_ne!(
            CacheKey::new("alice", &plain, RequestKind::UserInput),
            CacheKey::new("bob", &plain, RequestKind::UserInput)
        );
    }

    /// Property: anything under three words is small talk.
    #[test]
    fn prop_short_text_is_casual(words in prop::collection::vec("[a-z]{1,12}", 0..3)) {
        prop_assert!(is_casual(&words.join(" ")));
    }

    /// Property: parsing arbitrary text never panics and clamps confidence.
    #[test]
    fn prop_parse_never_panics(text in "\\PC{0,400}") {
        if let Some(facts) = parse_model_output(&text) {
            prop_assert!((0.0..=1.0).contains(&facts.confidence));
        }
    }

    /// Property: JSON-shaped noise is parsed or rejected, never a panic.
    #[test]
    fn prop_parse_json_shaped_noise(
        topic in "[a-z ]{0,20}",
        confidence in -5.0f32..5.0,
        trailing in prop::bool::ANY
    ) {
        let comma = if trailing { "," } else { "" };
        let text = format!(
            r#"Here you go: {{"events": [{{"topic": "{topic}"{comma}}}{comma}], "confidence": {confidence}{comma}}}"#
        );
        let facts = parse_model_output(&text);
        prop_assert!(facts.is_some());
        let facts = facts.unwrap();
        prop_assert!((0.0..=1.0).contains(&facts.confidence));
        prop_assert!(facts.events.len() <= 1);
    }

    /// Property: pattern rules are total over arbitrary input.
    #[test]
    fn prop_pattern_rules_total(text in "\\PC{0,200}") {
        let rules = PatternRuleSet::standard();
        if let Some(facts) = rules.try_extract(&text) {
            prop_assert!(!facts.events.is_empty());
            prop_assert!((0.0..=1.0).contains(&facts.confidence));
        }
    }

    /// Property: similarity is a symmetric ratio in `0..=1`.
    #[test]
    fn prop_similarity_bounded_and_symmetric(a in "\\PC{0,30}", b in "\\PC{0,30}") {
        let ab = similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((ab - similarity(&b, &a)).abs() < 1e-12);
        prop_assert_eq!(levenshtein(&a, &a), 0);
        prop_assert!(levenshtein(&a, &b) <= a.chars().count().max(b.chars().count()));
    }

    /// Property: backoff grows without passing the cap.
    #[test]
    fn prop_backoff_capped_and_monotone(base_ms in 1u64..2_000, cap_ms in 1u64..60_000, attempt in 0u32..64) {
        let config = BackendClientConfig::default()
            .with_backoff(Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
        let current = config.backoff(attempt);
        prop_assert!(current <= Duration::from_millis(cap_ms));
        prop_assert!(config.backoff(attempt + 1) >= current);
    }
}
