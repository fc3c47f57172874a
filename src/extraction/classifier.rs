//! Complexity scoring and tier selection.
//!
//! The score is a capped sum of weighted signals:
//!
//! | Signal | Weight |
//! |--------|--------|
//! | Location mention (exact) | +2 each |
//! | Location mention (fuzzy only) | +1 each |
//! | Temporal reference | +2 |
//! | Named person | +2 |
//! | Activity verb | +1 |
//! | Emotional vocabulary | +1 |
//! | Compound connective | +1 |
//!
//! The score never exceeds [`MAX_SCORE`].
// Static regexes are compile-checked by the tests below.
#![allow(clippy::expect_used)]

use super::fuzzy;
use super::pattern::{KNOWN_PLACES, PLACE_MATCH_THRESHOLD};
use crate::models::Tier;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Upper bound of [`ComplexityClassifier::score`].
pub const MAX_SCORE: u8 = 10;

const LOCATION_WORDS: &[&str] = &[
    "restaurant", "store", "shop", "work", "office", "home", "school", "park", "mall", "gym",
    "beach", "airport", "hospital", "church", "library", "cafe", "bar", "museum", "cinema",
    "station", "university", "college", "downtown",
];

const PERSON_WORDS: &[&str] = &[
    "mom", "dad", "mother", "father", "sister", "brother", "friend", "friends", "wife",
    "husband", "son", "daughter", "boss", "coworker", "colleague", "family", "girlfriend",
    "boyfriend", "grandma", "grandpa", "aunt", "uncle", "cousin", "landlord", "neighbor",
    "teacher", "doctor", "roommate",
];

const ACTIVITY_WORDS: &[&str] = &[
    "went", "visited", "read", "finished", "completed", "did", "learning", "studying",
    "working", "doing", "planning", "played", "playing", "watched", "cooked", "bought", "met",
    "argued", "called", "ate", "drove", "walked", "moved", "started", "travelled", "traveled",
];

const EMOTION_WORDS: &[&str] = &[
    "happy", "sad", "excited", "worried", "nervous", "love", "hate", "stressed", "enjoy",
    "enjoyed", "like", "angry", "upset", "tired", "anxious", "glad", "scared", "frustrated",
    "proud", "lonely",
];

const CONNECTIVE_WORDS: &[&str] = &[
    "and", "but", "because", "so", "then", "although", "though", "while", "after", "before",
    "which", "when", "since", "unless",
];

/// Capitalized words that never name a person.
const NOT_A_NAME: &[&str] = &[
    "i", "i'm", "i've", "i'll", "i'd", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "january", "february", "march", "april", "may", "june", "july",
    "august", "september", "october", "november", "december", "christmas", "easter",
];

static TEMPORAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)\b(
            today|tomorrow|yesterday|tonight|earlier|later|weekend|morning|afternoon|evening
            |monday|tuesday|wednesday|thursday|friday|saturday|sunday
            |next\s+\w+|last\s+\w+|o'clock|\d{1,2}(:\d{2})?\s?(am|pm)
        )\b",
    )
    .expect("static regex: temporal reference")
});

/// Thresholds of the tier table.
///
/// `score <= fast_max_score && words <= fast_max_words` selects Fast,
/// `score <= shallow_max_score && words <= shallow_max_words` selects
/// Shallow, anything else Deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierThresholds {
    /// Highest Fast score.
    pub fast_max_score: u8,
    /// Highest Fast word count.
    pub fast_max_words: usize,
    /// Highest Shallow score.
    pub shallow_max_score: u8,
    /// Highest Shallow word count.
    pub shallow_max_words: usize,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            fast_max_score: 3,
            fast_max_words: 8,
            shallow_max_score: 6,
            shallow_max_words: 20,
        }
    }
}

impl TierThresholds {
    /// Selects the tier for a score and word count.
    #[must_use]
    pub const fn select(&self, score: u8, word_count: usize) -> Tier {
        if score <= self.fast_max_score && word_count <= self.fast_max_words {
            Tier::Fast
        } else if score <= self.shallow_max_score && word_count <= self.shallow_max_words {
            Tier::Shallow
        } else {
            Tier::Deep
        }
    }
}

/// Full classification of one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Capped complexity score.
    pub score: u8,
    /// Whitespace-separated word count.
    pub word_count: usize,
    /// Selected tier.
    pub tier: Tier,
    /// Names of the signals that fired.
    pub signals: Vec<&'static str>,
}

/// Scores text complexity and picks a [`Tier`].
#[derive(Debug, Clone, Default)]
pub struct ComplexityClassifier {
    thresholds: TierThresholds,
}

impl ComplexityClassifier {
    /// Creates a classifier with custom thresholds.
    #[must_use]
    pub const fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    /// Active thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    /// Complexity score in `0..=10`.
    #[must_use]
    pub fn score(&self, text: &str) -> u8 {
        self.classify(text).score
    }

    /// Tier for a score and word count.
    #[must_use]
    pub const fn select_tier(&self, score: u8, word_count: usize) -> Tier {
        self.thresholds.select(score, word_count)
    }

    /// Scores `text` and selects its tier.
    #[must_use]
    pub fn classify(&self, text: &str) -> Classification {
        let tokens = tokenize(text);
        let lowered: Vec<String> = tokens.iter().map(|t| t.word.to_lowercase()).collect();
        let mut signals = Vec::new();
        let mut score: u32 = 0;

        let location = location_points(&lowered);
        if location > 0 {
            signals.push("location");
            score += location;
        }
        if TEMPORAL.is_match(&text.to_lowercase()) {
            signals.push("temporal");
            score += 2;
        }
        if has_person(&tokens, &lowered) {
            signals.push("person");
            score += 2;
        }
        if contains_any(&lowered, ACTIVITY_WORDS) {
            signals.push("activity");
            score += 1;
        }
        if contains_any(&lowered, EMOTION_WORDS) {
            signals.push("emotion");
            score += 1;
        }
        if contains_any(&lowered, CONNECTIVE_WORDS) {
            signals.push("connective");
            score += 1;
        }

        let score = u8::try_from(score.min(u32::from(MAX_SCORE))).unwrap_or(MAX_SCORE);
        let word_count = text.split_whitespace().count();
        Classification {
            score,
            word_count,
            tier: self.select_tier(score, word_count),
            signals,
        }
    }
}

struct Token<'a> {
    word: &'a str,
    sentence_start: bool,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut sentence_start = true;
    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
        if !word.is_empty() {
            tokens.push(Token {
                word,
                sentence_start,
            });
        }
        sentence_start = raw.ends_with(['.', '!', '?']);
    }
    tokens
}

fn contains_any(words: &[String], vocabulary: &[&str]) -> bool {
    words.iter().any(|w| vocabulary.contains(&w.as_str()))
}

/// +2 per distinct exact place, +1 per distinct fuzzy-only place.
fn location_points(words: &[String]) -> u32 {
    let names: Vec<&str> = KNOWN_PLACES.iter().map(|p| p.name).collect();
    let mut exact: BTreeSet<&str> = BTreeSet::new();
    let mut fuzzy_only: BTreeSet<&str> = BTreeSet::new();

    for (i, word) in words.iter().enumerate() {
        if let Some(place) = LOCATION_WORDS.iter().find(|w| **w == word.as_str()) {
            exact.insert(*place);
            continue;
        }
        let mut candidates = vec![word.clone()];
        if let Some(next) = words.get(i + 1) {
            candidates.push(format!("{word} {next}"));
        }
        for candidate in candidates {
            if fuzzy::squash(&candidate).chars().count() < 3 {
                continue;
            }
            if let Some((name, similarity)) =
                fuzzy::best_match(&candidate, &names, PLACE_MATCH_THRESHOLD)
            {
                if similarity >= 1.0 - f64::EPSILON {
                    exact.insert(name);
                } else {
                    fuzzy_only.insert(name);
                }
            }
        }
    }

    fuzzy_only.retain(|name| !exact.contains(name));
    let exact = u32::try_from(exact.len()).unwrap_or(u32::MAX);
    let fuzzy = u32::try_from(fuzzy_only.len()).unwrap_or(u32::MAX);
    exact.saturating_mul(2).saturating_add(fuzzy)
}

fn has_person(tokens: &[Token<'_>], lowered: &[String]) -> bool {
    if contains_any(lowered, PERSON_WORDS) {
        return true;
    }
    let names: Vec<&str> = KNOWN_PLACES.iter().map(|p| p.name).collect();
    tokens.iter().zip(lowered).any(|(token, lower)| {
        !token.sentence_start
            && token.word.chars().next().is_some_and(char::is_uppercase)
            && !NOT_A_NAME.contains(&lower.as_str())
            && fuzzy::best_match(token.word, &names, PLACE_MATCH_THRESHOLD).is_none()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_static_patterns_compile() {
        assert!(TEMPORAL.is_match("see you tomorrow"));
        assert!(TEMPORAL.is_match("around 7:30 pm"));
        assert!(!TEMPORAL.is_match("the weather seems nice"));
    }

    #[test_case(0, 1, Tier::Fast)]
    #[test_case(3, 8, Tier::Fast)]
    #[test_case(4, 8, Tier::Shallow)]
    #[test_case(3, 9, Tier::Shallow)]
    #[test_case(6, 20, Tier::Shallow)]
    #[test_case(7, 5, Tier::Deep)]
    #[test_case(2, 21, Tier::Deep)]
    fn test_select_tier(score: u8, words: usize, expected: Tier) {
        assert_eq!(ComplexityClassifier::default().select_tier(score, words), expected);
    }

    #[test]
    fn test_plain_statement_is_fast() {
        let c = ComplexityClassifier::default().classify("the weather seems nice");
        assert_eq!(c.score, 0);
        assert_eq!(c.word_count, 4);
        assert_eq!(c.tier, Tier::Fast);
        assert!(c.signals.is_empty());
    }

    #[test]
    fn test_social_event_is_shallow() {
        let c = ComplexityClassifier::default()
            .classify("my sister argued with our landlord about the rent yesterday");
        assert_eq!(c.signals, vec!["temporal", "person", "activity"]);
        assert_eq!(c.score, 5);
        assert_eq!(c.tier, Tier::Shallow);
    }

    #[test]
    fn test_exact_and_fuzzy_locations() {
        let classifier = ComplexityClassifier::default();
        assert_eq!(location_points(&["starbucks".to_string()]), 2);
        assert_eq!(location_points(&["starbuks".to_string()]), 1);
        assert_eq!(
            location_points(&["burger".to_string(), "king".to_string()]),
            2
        );
        assert_eq!(
            location_points(&["park".to_string(), "park".to_string()]),
            2
        );
        assert_eq!(classifier.score("park mall beach gym"), 8);
    }

    #[test]
    fn test_capitalized_name_counts_as_person() {
        let classifier = ComplexityClassifier::default();
        assert!(classifier.classify("lunch with Francesco").signals.contains(&"person"));
        assert!(!classifier.classify("Lunch on Monday").signals.contains(&"person"));
        assert!(!classifier.classify("so I went out").signals.contains(&"person"));
    }

    #[test]
    fn test_score_is_capped() {
        let text = "Yesterday my sister and Francesco went to Starbucks and Walmart and the \
                    park because we were stressed and happy";
        assert_eq!(ComplexityClassifier::default().score(text), MAX_SCORE);
    }
}
