//! Zero-backend fast path: ordered pattern rules.
//!
//! Each rule pairs a matcher over normalized text with a builder that
//! materializes [`Facts`]. Rules are evaluated in order and the first one
//! that produces facts wins.
//!
//! | Order | Rule | Family | Status |
//! |-------|------|--------|--------|
//! | 1 | `known_place_visit` | location visit | past |
//! | 2 | `place_visit` | location visit | past |
//! | 3 | `finished_reading` | reading | past |
//! | 4 | `ongoing_reading` | reading | current |
//! | 5 | `learning` | learning | current |
//! | 6 | `future_plan` | future plan | future |
// Static regexes are compile-checked by the tests below.
#![allow(clippy::expect_used)]

use super::fuzzy;
use crate::cache::normalize;
use crate::models::{EmotionalState, EventKind, EventStatus, Facts, MemoryEvent};
use chrono::Local;
use regex::{Captures, Regex};
use std::fmt;
use std::sync::LazyLock;

/// Minimum similarity for a fuzzy place match.
pub const PLACE_MATCH_THRESHOLD: f64 = 0.8;

/// A place the fast path recognizes by (possibly misspelled) name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownPlace {
    /// Canonical display name.
    pub name: &'static str,
    /// Keyword attached to extracted facts.
    pub keyword: &'static str,
    /// Kind of place, used in event details.
    pub category: &'static str,
}

const fn place(name: &'static str, keyword: &'static str, category: &'static str) -> KnownPlace {
    KnownPlace {
        name,
        keyword,
        category,
    }
}

/// Places recognized by the known-place rule.
pub const KNOWN_PLACES: &[KnownPlace] = &[
    place("McDonald's", "mcdonald", "restaurant"),
    place("Starbucks", "starbucks", "cafe"),
    place("Walmart", "walmart", "store"),
    place("Target", "target", "store"),
    place("Burger King", "burger king", "restaurant"),
    place("Taco Bell", "taco bell", "restaurant"),
    place("Costco", "costco", "store"),
    place("Subway", "subway", "restaurant"),
    place("KFC", "kfc", "restaurant"),
    place("Wendy's", "wendys", "restaurant"),
    place("Chipotle", "chipotle", "restaurant"),
    place("Home Depot", "home depot", "store"),
    place("IKEA", "ikea", "store"),
    place("Trader Joe's", "trader joes", "store"),
    place("Whole Foods", "whole foods", "store"),
];

/// Words that follow "went to" without naming a place.
const NOT_A_PLACE: &[&str] = &[
    "a", "an", "the", "my", "his", "her", "our", "their", "some", "bed", "sleep", "see", "get",
    "do", "be", "have", "make", "say", "talk", "ask", "try", "go",
];

static VISIT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:went to|been to|visited|stopped by|was at)\s+(?:the\s+)?([a-z0-9'&]+)(?:\s+([a-z0-9'&]+))?",
    )
    .expect("static regex: visit phrase")
});

static PLACE_VISIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:went to|been to|visited)\s+(?:the\s+)?([a-z]+)")
        .expect("static regex: place visit")
});

static FINISHED_READING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bread\s+(?:a\s+|an\s+|the\s+)?([a-z0-9']+)").expect("static regex: read")
});

static ONGOING_READING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\breading\s+(?:a\s+|an\s+|the\s+)?([a-z0-9']+)").expect("static regex: reading")
});

static LEARNING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:learning|studying)\s+(?:about\s+)?([a-z0-9']+)")
        .expect("static regex: learning")
});

static FUTURE_PLAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:planning to|going to|gonna)\s+(?:go\s+)?(?:on\s+)?(?:a\s+)?([a-z]+)\s+(next\s+[a-z]+|tomorrow|tonight|this\s+weekend)",
    )
    .expect("static regex: future plan")
});

static TIME_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(earlier|today|yesterday|this morning|this afternoon|last night|tonight|tomorrow|next [a-z]+)\b",
    )
    .expect("static regex: time reference")
});

/// Family a rule belongs to. Families are tried in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleFamily {
    /// Visiting a place.
    LocationVisit,
    /// Reading something.
    Reading,
    /// Learning or studying something.
    Learning,
    /// A planned activity.
    FuturePlan,
}

impl RuleFamily {
    /// Returns the family as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LocationVisit => "location_visit",
            Self::Reading => "reading",
            Self::Learning => "learning",
            Self::FuturePlan => "future_plan",
        }
    }
}

impl fmt::Display for RuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One fast-path rule.
///
/// Implementations must be pure: no shared state, no I/O, no panics.
pub trait PatternRule: Send + Sync {
    /// Stable rule name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Family the rule belongs to.
    fn family(&self) -> RuleFamily;

    /// Builds facts when the rule matches `normalized` (lowercased,
    /// whitespace-collapsed text).
    fn apply(&self, normalized: &str) -> Option<Facts>;
}

/// Builder invoked with the captures of a [`RegexRule`].
pub type RegexBuilder = fn(&Captures<'_>, &str) -> Option<Facts>;

/// Rule made of a regex matcher and a builder function.
pub struct RegexRule {
    name: &'static str,
    family: RuleFamily,
    pattern: &'static LazyLock<Regex>,
    build: RegexBuilder,
}

impl RegexRule {
    /// Creates a regex rule.
    #[must_use]
    pub const fn new(
        name: &'static str,
        family: RuleFamily,
        pattern: &'static LazyLock<Regex>,
        build: RegexBuilder,
    ) -> Self {
        Self {
            name,
            family,
            pattern,
            build,
        }
    }
}

impl PatternRule for RegexRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn family(&self) -> RuleFamily {
        self.family
    }

    fn apply(&self, normalized: &str) -> Option<Facts> {
        let captures = self.pattern.captures(normalized)?;
        (self.build)(&captures, normalized)
    }
}

/// Visit to a place from a fixed dictionary, tolerant of typos and missing
/// apostrophes.
pub struct KnownPlaceRule {
    places: &'static [KnownPlace],
    threshold: f64,
}

impl KnownPlaceRule {
    /// Rule over [`KNOWN_PLACES`] at [`PLACE_MATCH_THRESHOLD`].
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            places: KNOWN_PLACES,
            threshold: PLACE_MATCH_THRESHOLD,
        }
    }

    fn lookup(&self, candidate: &str) -> Option<(KnownPlace, f64)> {
        let names: Vec<&str> = self.places.iter().map(|p| p.name).collect();
        let (name, score) = fuzzy::best_match(candidate, &names, self.threshold)?;
        self.places
            .iter()
            .find(|p| p.name == name)
            .map(|p| (*p, score))
    }
}

impl PatternRule for KnownPlaceRule {
    fn name(&self) -> &'static str {
        "known_place_visit"
    }

    fn family(&self) -> RuleFamily {
        RuleFamily::LocationVisit
    }

    fn apply(&self, normalized: &str) -> Option<Facts> {
        let captures = VISIT_PHRASE.captures(normalized)?;
        let first = captures.get(1)?.as_str();
        let two_words = captures
            .get(2)
            .map(|second| format!("{first} {}", second.as_str()));

        // Multi-word names ("burger king") compete with the single word.
        let single = self.lookup(first);
        let double = two_words.as_deref().and_then(|c| self.lookup(c));
        let (place, _) = match (single, double) {
            (Some(a), Some(b)) => {
                if b.1 > a.1 {
                    b
                } else {
                    a
                }
            },
            (a, b) => a.or(b)?,
        };

        let event = MemoryEvent::new(
            EventKind::LifeEvent,
            format!("{} visit", place.name),
            EventStatus::Past,
        )
        .with_location(place.name)
        .with_time_reference(time_reference(normalized))
        .with_date(today())
        .with_details(format!("visited {}", place.category));

        Some(casual_facts(
            event,
            vec![
                place.keyword.to_string(),
                "visit".to_string(),
                place.category.to_string(),
            ],
            0.9,
        ))
    }
}

/// Ordered set of fast-path rules.
///
/// # Example
///
/// ```rust
/// use extractd::extraction::PatternRuleSet;
///
/// let rules = PatternRuleSet::standard();
/// let facts = rules.try_extract("I went to mcdonald earlier").unwrap_or_default();
/// let event = &facts.events[0];
/// assert_eq!(event.location.as_deref(), Some("McDonald's"));
/// assert_eq!(event.time_reference.as_deref(), Some("earlier"));
/// ```
pub struct PatternRuleSet {
    rules: Vec<Box<dyn PatternRule>>,
}

impl PatternRuleSet {
    /// Set with no rules; every lookup misses.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The built-in rules in priority order.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(KnownPlaceRule::standard())
            .with_rule(RegexRule::new(
                "place_visit",
                RuleFamily::LocationVisit,
                &PLACE_VISIT,
                build_place_visit,
            ))
            .with_rule(RegexRule::new(
                "finished_reading",
                RuleFamily::Reading,
                &FINISHED_READING,
                build_finished_reading,
            ))
            .with_rule(RegexRule::new(
                "ongoing_reading",
                RuleFamily::Reading,
                &ONGOING_READING,
                build_ongoing_reading,
            ))
            .with_rule(RegexRule::new(
                "learning",
                RuleFamily::Learning,
                &LEARNING,
                build_learning,
            ))
            .with_rule(RegexRule::new(
                "future_plan",
                RuleFamily::FuturePlan,
                &FUTURE_PLAN,
                build_future_plan,
            ))
    }

    /// Appends a rule after the existing ones.
    #[must_use]
    pub fn with_rule(mut self, rule: impl PatternRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Facts from the first matching rule, or `None` when nothing fires.
    #[must_use]
    pub fn try_extract(&self, text: &str) -> Option<Facts> {
        self.try_extract_named(text).map(|(_, facts)| facts)
    }

    /// Like [`PatternRuleSet::try_extract`], also returning the rule name.
    #[must_use]
    pub fn try_extract_named(&self, text: &str) -> Option<(&'static str, Facts)> {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return None;
        }
        let hit = self
            .rules
            .iter()
            .find_map(|rule| rule.apply(&normalized).map(|facts| (rule, facts)));
        match hit {
            Some((rule, facts)) => {
                tracing::debug!(
                    rule = rule.name(),
                    family = rule.family().as_str(),
                    "Pattern rule matched"
                );
                metrics::counter!("pattern_matches_total", "rule" => rule.name()).increment(1);
                Some((rule.name(), facts))
            },
            None => {
                metrics::counter!("pattern_matches_total", "rule" => "none").increment(1);
                None
            },
        }
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when the set holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }
}

impl Default for PatternRuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for PatternRuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternRuleSet")
            .field("rules", &self.names())
            .finish()
    }
}

fn today() -> chrono::NaiveDate {
    Local::now().date_naive()
}

fn time_reference(normalized: &str) -> Option<String> {
    TIME_REFERENCE
        .captures(normalized)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn casual_facts(event: MemoryEvent, keywords: Vec<String>, confidence: f32) -> Facts {
    Facts {
        emotion: EmotionalState::new("casual", 0.8),
        ..Facts::from_event(event, keywords, confidence)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn build_place_visit(captures: &Captures<'_>, normalized: &str) -> Option<Facts> {
    let word = captures.get(1)?.as_str();
    if NOT_A_PLACE.contains(&word) {
        return None;
    }
    let location = capitalize(word);
    let event = MemoryEvent::new(
        EventKind::LifeEvent,
        format!("{location} visit"),
        EventStatus::Past,
    )
    .with_location(location.clone())
    .with_time_reference(time_reference(normalized))
    .with_date(today())
    .with_details("visited location");
    Some(casual_facts(
        event,
        vec![word.to_string(), "visit".to_string()],
        0.8,
    ))
}

fn build_finished_reading(captures: &Captures<'_>, normalized: &str) -> Option<Facts> {
    let item = captures.get(1)?.as_str();
    let event = MemoryEvent::new(EventKind::Highlight, format!("read {item}"), EventStatus::Past)
        .with_time_reference(time_reference(normalized))
        .with_date(today())
        .with_details(format!("finished reading {item}"));
    Some(casual_facts(
        event,
        vec!["reading".to_string(), item.to_string()],
        0.9,
    ))
}

fn build_ongoing_reading(captures: &Captures<'_>, normalized: &str) -> Option<Facts> {
    let item = captures.get(1)?.as_str();
    let event = MemoryEvent::new(
        EventKind::Highlight,
        format!("reading {item}"),
        EventStatus::Current,
    )
    .with_time_reference(time_reference(normalized))
    .with_date(today())
    .with_details(format!("currently reading {item}"));
    Some(casual_facts(
        event,
        vec!["reading".to_string(), item.to_string()],
        0.9,
    ))
}

fn build_learning(captures: &Captures<'_>, normalized: &str) -> Option<Facts> {
    let subject = captures.get(1)?.as_str();
    let event = MemoryEvent::new(
        EventKind::Highlight,
        format!("learning {subject}"),
        EventStatus::Current,
    )
    .with_time_reference(time_reference(normalized))
    .with_date(today())
    .with_details(format!("studying {subject}"));
    Some(casual_facts(
        event,
        vec!["learning".to_string(), subject.to_string()],
        0.9,
    ))
}

fn build_future_plan(captures: &Captures<'_>, _normalized: &str) -> Option<Facts> {
    let activity = captures.get(1)?.as_str();
    let when = captures.get(2)?.as_str();
    let event = MemoryEvent::new(
        EventKind::Appointment,
        format!("{activity} plan"),
        EventStatus::Future,
    )
    .with_time_reference(Some(when.to_string()))
    .with_details(format!("planning to {activity}"));
    Some(Facts {
        emotion: EmotionalState::new("excited", 0.8),
        ..Facts::from_event(
            event,
            vec![
                activity.to_string(),
                "planning".to_string(),
                when.replace(' ', "_"),
            ],
            0.8,
        )
    })
}
