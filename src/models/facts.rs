//! Structured facts produced by extraction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Intent label used when nothing more specific was extracted.
pub const CASUAL_INTENT: &str = "casual_conversation";

/// Category of an extracted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Time-specific event such as a meeting or reservation.
    Appointment,
    /// Social or emotional event.
    LifeEvent,
    /// Thought, feeling or piece of information.
    #[default]
    Highlight,
}

impl EventKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::LifeEvent => "life_event",
            Self::Highlight => "highlight",
        }
    }

    /// Parses an event kind, accepting the loose labels models tend to emit.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "appointment" | "plan" | "plans" | "meeting" => Some(Self::Appointment),
            "life_event" | "lifeevent" | "event" | "activity" => Some(Self::LifeEvent),
            "highlight" | "thought" | "feeling" | "information" => Some(Self::Highlight),
            _ => None,
        }
    }
}

/// Whether an event already happened, is ongoing, or is planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Completed event.
    #[default]
    Past,
    /// Ongoing activity.
    Current,
    /// Planned event.
    Future,
}

impl EventStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Past => "past",
            Self::Current => "current",
            Self::Future => "future",
        }
    }

    /// Parses a status label.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "past" | "completed" | "done" => Some(Self::Past),
            "current" | "ongoing" | "present" => Some(Self::Current),
            "future" | "planned" | "upcoming" => Some(Self::Future),
            _ => None,
        }
    }
}

/// One event extracted from an utterance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryEvent {
    /// Event category.
    pub kind: EventKind,
    /// Short description, e.g. `"McDonald's visit"`.
    pub topic: String,
    /// Calendar date the event refers to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Relative time phrase from the utterance, e.g. `"earlier"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_reference: Option<String>,
    /// Place mentioned, canonicalized when recognized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// People involved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<String>,
    /// Temporal status.
    pub status: EventStatus,
    /// Emotion attached to the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    /// Free-form details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl MemoryEvent {
    /// Creates an event with the given kind, topic and status.
    #[must_use]
    pub fn new(kind: EventKind, topic: impl Into<String>, status: EventStatus) -> Self {
        Self {
            kind,
            topic: topic.into(),
            status,
            ..Default::default()
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the relative time phrase.
    #[must_use]
    pub fn with_time_reference(mut self, time_reference: Option<String>) -> Self {
        self.time_reference = time_reference;
        self
    }

    /// Sets the calendar date.
    #[must_use]
    pub const fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Emotional state attached to an utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    /// Dominant emotion label.
    pub primary: String,
    /// Intensity in `0.0..=1.0`, when the model reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f32,
}

impl EmotionalState {
    /// Creates an emotional state.
    #[must_use]
    pub fn new(primary: impl Into<String>, confidence: f32) -> Self {
        Self {
            primary: primary.into(),
            intensity: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Neutral emotion with the given confidence.
    #[must_use]
    pub fn neutral(confidence: f32) -> Self {
        Self::new("neutral", confidence)
    }
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self::neutral(0.5)
    }
}

/// Structured result of extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facts {
    /// Extracted events, most significant first.
    pub events: Vec<MemoryEvent>,
    /// Intent label such as `statement` or `question`.
    pub intent: String,
    /// Emotional state.
    pub emotion: EmotionalState,
    /// Context keywords.
    pub keywords: Vec<String>,
    /// Suggested follow-up questions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<String>,
    /// Overall extraction confidence in `0.0..=1.0`.
    pub confidence: f32,
}

impl Default for Facts {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            intent: CASUAL_INTENT.to_string(),
            emotion: EmotionalState::default(),
            keywords: Vec::new(),
            follow_ups: Vec::new(),
            confidence: 0.5,
        }
    }
}

impl Facts {
    /// Facts for small talk: no events, high confidence that nothing is there.
    #[must_use]
    pub fn casual() -> Self {
        Self {
            emotion: EmotionalState::neutral(0.9),
            confidence: 0.9,
            ..Self::default()
        }
    }

    /// Minimal facts built from the raw text: no events, the first three
    /// words as keywords.
    #[must_use]
    pub fn minimal(text: &str) -> Self {
        Self {
            keywords: text
                .to_lowercase()
                .split_whitespace()
                .take(3)
                .map(str::to_string)
                .collect(),
            ..Self::default()
        }
    }

    /// Facts holding a single event.
    #[must_use]
    pub fn from_event(event: MemoryEvent, keywords: Vec<String>, confidence: f32) -> Self {
        Self {
            events: vec![event],
            intent: "statement".to_string(),
            emotion: EmotionalState::neutral(0.7),
            keywords,
            follow_ups: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// First (most significant) event.
    #[must_use]
    pub fn primary_event(&self) -> Option<&MemoryEvent> {
        self.events.first()
    }

    /// True when no events were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
