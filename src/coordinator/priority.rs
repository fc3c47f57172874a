//! Priority derivation for requests without an explicit priority.

use super::ActivityTracker;
use crate::cache::normalize;
use crate::models::{Priority, Request, RequestKind};

/// Phrases suggesting an utterance continues something already remembered.
pub const DEFAULT_CONTINUATION_KEYWORDS: &[&str] = &[
    "also",
    "too",
    "again",
    "still",
    "as well",
    "and then",
    "after that",
    "together",
    "remember",
    "that place",
];

/// Detects utterances that extend an existing memory.
#[derive(Debug, Clone)]
pub struct ContinuationMatcher {
    keywords: Vec<String>,
}

impl Default for ContinuationMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONTINUATION_KEYWORDS.iter().copied())
    }
}

impl ContinuationMatcher {
    /// Creates a matcher over the given keywords or phrases.
    #[must_use]
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| normalize(k.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// True when a keyword occurs in `text` as whole words. Punctuation is
    /// ignored.
    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        let words: String = text
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
            .collect();
        let padded = format!(" {} ", normalize(&words));
        self.keywords
            .iter()
            .any(|keyword| padded.contains(&format!(" {keyword} ")))
    }
}

/// Effective priority of `request`.
///
/// An explicit priority always wins. Otherwise:
///
/// | Kind | Priority |
/// |------|----------|
/// | `UserInput` | Critical |
/// | `ConsciousnessModule` | High if the owner was recently active, else Normal |
/// | `MemoryFusion` | High if it continues an existing memory, else Normal |
/// | `Background` | Low |
#[must_use]
pub fn derive_priority(
    request: &Request,
    activity: &ActivityTracker,
    continuation: &ContinuationMatcher,
) -> Priority {
    if let Some(priority) = request.priority() {
        return priority;
    }
    match request.kind() {
        RequestKind::UserInput => Priority::Critical,
        RequestKind::ConsciousnessModule if activity.is_recent(request.owner()) => Priority::High,
        RequestKind::MemoryFusion if continuation.matches(request.text()) => Priority::High,
        RequestKind::ConsciousnessModule | RequestKind::MemoryFusion => Priority::Normal,
        RequestKind::Background => Priority::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_case::test_case;

    fn derive(request: &Request, activity: &ActivityTracker) -> Priority {
        derive_priority(request, activity, &ContinuationMatcher::default())
    }

    #[test_case(RequestKind::UserInput, Priority::Critical)]
    #[test_case(RequestKind::ConsciousnessModule, Priority::Normal)]
    #[test_case(RequestKind::MemoryFusion, Priority::Normal)]
    #[test_case(RequestKind::Background, Priority::Low)]
    fn test_kind_defaults(kind: RequestKind, expected: Priority) {
        let activity = ActivityTracker::new(Duration::from_secs(60));
        let request = Request::new("alice", "we had lunch downtown", kind);
        assert_eq!(derive(&request, &activity), expected);
    }

    #[test]
    fn test_consciousness_is_high_when_owner_active() {
        let activity = ActivityTracker::new(Duration::from_secs(60));
        activity.record("alice");
        let request = Request::new("alice", "reflect", RequestKind::ConsciousnessModule);
        assert_eq!(derive(&request, &activity), Priority::High);
        let other = Request::new("bob", "reflect", RequestKind::ConsciousnessModule);
        assert_eq!(derive(&other, &activity), Priority::Normal);
    }

    #[test]
    fn test_fusion_continuation_is_high() {
        let activity = ActivityTracker::new(Duration::from_secs(60));
        let request = Request::new("alice", "I got a McFlurry too", RequestKind::MemoryFusion);
        assert_eq!(derive(&request, &activity), Priority::High);
    }

    #[test]
    fn test_explicit_priority_wins() {
        let activity = ActivityTracker::new(Duration::from_secs(60));
        let request =
            Request::new("alice", "x y z", RequestKind::UserInput).with_priority(Priority::Low);
        assert_eq!(derive(&request, &activity), Priority::Low);
    }

    #[test]
    fn test_continuation_matches_whole_words_only() {
        let matcher = ContinuationMatcher::new(["too", "and then"]);
        assert!(matcher.matches("Me too!"));
        assert!(!matcher.matches("I ate a tool"));
        assert!(matcher.matches("we ate AND  then left"));
    }
}
