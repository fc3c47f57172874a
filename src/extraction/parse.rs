//! Lenient parsing of model output into [`Facts`].
//!
//! Models wrap JSON in prose or markdown fences, leave trailing commas and
//! mix field names between prompt versions. Parsing tolerates all of that;
//! anything still unreadable yields `None`.
// Static regexes are compile-checked by the tests below.
#![allow(clippy::expect_used)]

use crate::models::{EmotionalState, EventKind, EventStatus, Facts, MemoryEvent, CASUAL_INTENT};
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r",(\s*[}\]])").expect("static regex: trailing comma")
});

/// Confidence assumed when the model reports none.
const DEFAULT_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawExtraction {
    events: Vec<RawEvent>,
    intent: Option<String>,
    emotion: Option<String>,
    emotional_state: Option<RawEmotionalState>,
    #[serde(alias = "context_keywords")]
    keywords: Vec<Value>,
    #[serde(alias = "follow_up_potential", alias = "follow_up_suggestions")]
    follow_ups: Vec<Value>,
    confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEmotionalState {
    #[serde(alias = "emotion")]
    primary_emotion: Option<String>,
    intensity: Option<f32>,
    confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    topic: Option<String>,
    date: Option<String>,
    time: Option<Value>,
    people: Option<Value>,
    location: Option<Value>,
    details: Option<Value>,
    status: Option<String>,
    emotion: Option<String>,
}

impl RawEvent {
    fn into_event(self) -> Option<MemoryEvent> {
        let topic = self.topic.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
        let kind = self
            .kind
            .as_deref()
            .and_then(EventKind::parse)
            .unwrap_or_default();
        let status = self
            .status
            .as_deref()
            .and_then(EventStatus::parse)
            .unwrap_or(if kind == EventKind::Appointment {
                EventStatus::Future
            } else {
                EventStatus::Past
            });

        let mut event = MemoryEvent::new(kind, topic, status)
            .with_time_reference(self.time.as_ref().and_then(non_empty_string));
        event.date = self
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());
        event.location = self.location.as_ref().and_then(non_empty_string);
        event.details = self.details.as_ref().and_then(non_empty_string);
        event.people = self.people.as_ref().map(string_list).unwrap_or_default();
        event.emotion = self.emotion.filter(|e| !e.trim().is_empty());
        Some(event)
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(non_empty_string).collect(),
        other => non_empty_string(other).into_iter().collect(),
    }
}

/// Parses model text into facts. `None` when no JSON object can be read.
#[must_use]
pub fn parse_model_output(text: &str) -> Option<Facts> {
    let candidate = extract_json(text);
    let cleaned = strip_trailing_commas(candidate);
    let raw: RawExtraction = serde_json::from_str(&cleaned)
        .or_else(|_| serde_json::from_str(&strip_control_chars(&cleaned)))
        .map_err(|e| tracing::debug!(error = %e, "Model output is not valid extraction JSON"))
        .ok()?;
    Some(raw.into_facts())
}

impl RawExtraction {
    fn into_facts(self) -> Facts {
        let confidence = self.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0);
        let emotion = match (self.emotional_state, self.emotion) {
            (Some(state), fallback) => {
                let primary = state
                    .primary_emotion
                    .or(fallback)
                    .unwrap_or_else(|| "neutral".to_string());
                EmotionalState {
                    intensity: state.intensity.map(|i| i.clamp(0.0, 1.0)),
                    ..EmotionalState::new(primary, state.confidence.unwrap_or(confidence))
                }
            },
            (None, Some(primary)) => EmotionalState::new(primary, confidence),
            (None, None) => EmotionalState::default(),
        };

        Facts {
            events: self
                .events
                .into_iter()
                .filter_map(RawEvent::into_event)
                .collect(),
            intent: self
                .intent
                .filter(|i| !i.trim().is_empty())
                .unwrap_or_else(|| CASUAL_INTENT.to_string()),
            emotion,
            keywords: self.keywords.iter().flat_map(string_list).collect(),
            follow_ups: self.follow_ups.iter().flat_map(string_list).collect(),
            confidence,
        }
    }
}

/// Locates the JSON object inside a model response.
///
/// Tries a ```` ```json ```` fence, a bare fence, then the first `{` to the
/// last `}`. Falls back to the trimmed text.
fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let json_start = trimmed[content_start..]
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        return &trimmed[start..=end];
    }

    trimmed
}

fn strip_trailing_commas(json: &str) -> String {
    TRAILING_COMMA.replace_all(json, "$1").into_owned()
}

fn strip_control_chars(json: &str) -> String {
    json.chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect()
}
