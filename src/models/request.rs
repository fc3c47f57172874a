//! Extraction request types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Context key carrying recent conversation text for deep extraction.
pub const CONVERSATION_CONTEXT_KEY: &str = "conversation";

/// Where an extraction request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// Direct user utterance.
    UserInput,
    /// Internal reflection module asking about an utterance.
    ConsciousnessModule,
    /// Memory fusion pass merging new input into existing memories.
    MemoryFusion,
    /// Opportunistic background enrichment.
    Background,
}

impl RequestKind {
    /// Returns all request kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::UserInput,
            Self::ConsciousnessModule,
            Self::MemoryFusion,
            Self::Background,
        ]
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserInput => "user-input",
            Self::ConsciousnessModule => "consciousness-module",
            Self::MemoryFusion => "memory-fusion",
            Self::Background => "background",
        }
    }

    /// Parses a request kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "user-input" | "user" => Some(Self::UserInput),
            "consciousness-module" | "consciousness" => Some(Self::ConsciousnessModule),
            "memory-fusion" | "fusion" => Some(Self::MemoryFusion),
            "background" => Some(Self::Background),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch priority. Ordering is `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Opportunistic work; runs only when nothing else is queued.
    Low,
    /// Regular asynchronous work.
    Normal,
    /// Work tied to an active conversation.
    High,
    /// A user is waiting on this result.
    Critical,
}

impl Priority {
    /// Returns the priority as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses a priority from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Interactive priorities bypass the background lane.
    #[must_use]
    pub const fn is_interactive(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single extraction request.
///
/// Requests are immutable once built; the builder methods consume `self`.
#[derive(Debug, Clone)]
pub struct Request {
    id: String,
    owner: String,
    text: String,
    kind: RequestKind,
    priority: Option<Priority>,
    context: BTreeMap<String, String>,
    created_at: Instant,
    timeout_budget: Option<Duration>,
}

impl Request {
    /// Creates a request with a generated id and no explicit priority.
    #[must_use]
    pub fn new(owner: impl Into<String>, text: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            owner: owner.into(),
            text: text.into(),
            kind,
            priority: None,
            context: BTreeMap::new(),
            created_at: Instant::now(),
            timeout_budget: None,
        }
    }

    /// Overrides the generated request id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Pins the priority instead of deriving it from the kind.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Adds a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the end-to-end timeout budget.
    #[must_use]
    pub const fn with_timeout(mut self, budget: Duration) -> Self {
        self.timeout_budget = Some(budget);
        self
    }

    /// Request id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owner (user or session) the request belongs to.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Utterance text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Request kind.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Explicit priority, if one was pinned.
    #[must_use]
    pub const fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Context value for `key`.
    #[must_use]
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// All context entries.
    #[must_use]
    pub const fn context_map(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// When the request was built.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Explicit timeout budget, if any.
    #[must_use]
    pub const fn timeout_budget(&self) -> Option<Duration> {
        self.timeout_budget
    }

    /// Number of whitespace-separated words in the text.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("user-input", Some(RequestKind::UserInput))]
    #[test_case("USER_INPUT", Some(RequestKind::UserInput))]
    #[test_case("fusion", Some(RequestKind::MemoryFusion))]
    #[test_case("background", Some(RequestKind::Background))]
    #[test_case("nonsense", None)]
    fn test_request_kind_parse(input: &str, expected: Option<RequestKind>) {
        assert_eq!(RequestKind::parse(input), expected);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::High.is_interactive());
        assert!(!Priority::Normal.is_interactive());
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new("alice", "I went out", RequestKind::UserInput)
            .with_id("req-1")
            .with_priority(Priority::High)
            .with_context(CONVERSATION_CONTEXT_KEY, "earlier chat")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(request.id(), "req-1");
        assert_eq!(request.owner(), "alice");
        assert_eq!(request.priority(), Some(Priority::High));
        assert_eq!(request.context(CONVERSATION_CONTEXT_KEY), Some("earlier chat"));
        assert_eq!(request.timeout_budget(), Some(Duration::from_secs(5)));
        assert_eq!(request.word_count(), 3);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Request::new("u", "t", RequestKind::Background);
        let b = Request::new("u", "t", RequestKind::Background);
        assert_ne!(a.id(), b.id());
    }
}
