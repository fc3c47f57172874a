//! Tiered extraction prompts.
//!
//! Prompts grow with the tier: Fast carries a one-line schema, Shallow adds
//! the label vocabularies, Deep asks for the full structure and includes a
//! snippet of the conversation.

use crate::models::{CONVERSATION_CONTEXT_KEY, Request, Tier};
use chrono::Local;
use serde::{Deserialize, Serialize};

/// Characters of conversation context included in Deep prompts.
pub const CONTEXT_SNIPPET_CHARS: usize = 100;

/// Builds the backend prompt for a request at a tier.
pub trait PromptBuilder: Send + Sync {
    /// Returns the prompt text.
    fn build(&self, request: &Request, tier: Tier) -> String;
}

impl<F> PromptBuilder for F
where
    F: Fn(&Request, Tier) -> String + Send + Sync,
{
    fn build(&self, request: &Request, tier: Tier) -> String {
        self(request, tier)
    }
}

/// Output token budgets per backend tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBudgets {
    /// `max_tokens` for Shallow calls.
    pub shallow_max_tokens: u32,
    /// `max_tokens` for Deep calls.
    pub deep_max_tokens: u32,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            shallow_max_tokens: 256,
            deep_max_tokens: 1024,
        }
    }
}

impl TierBudgets {
    /// Budget for `tier`. Fast never calls the backend and gets the Shallow
    /// budget if asked.
    #[must_use]
    pub const fn budget(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Fast | Tier::Shallow => self.shallow_max_tokens,
            Tier::Deep => self.deep_max_tokens,
        }
    }
}

/// Default [`PromptBuilder`] with one template per tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct TieredPromptBuilder;

impl PromptBuilder for TieredPromptBuilder {
    fn build(&self, request: &Request, tier: Tier) -> String {
        let text = quote(request.text());
        let date = Local::now().format("%Y-%m-%d").to_string();
        match tier {
            Tier::Fast => fast_prompt(&text, &date),
            Tier::Shallow => shallow_prompt(&text, &date),
            Tier::Deep => deep_prompt(&text, &date, request.context(CONVERSATION_CONTEXT_KEY)),
        }
    }
}

fn quote(text: &str) -> String {
    text.trim().replace('"', "'")
}

fn fast_prompt(text: &str, date: &str) -> String {
    format!(
        r#"Extract basic info from: "{text}"
Date: {date}

JSON format:
{{"events": [{{"type": "highlight", "topic": "brief_desc", "date": "YYYY-MM-DD", "emotion": "neutral"}}], "intent": "statement", "emotion": "neutral", "keywords": ["key1"]}}"#
    )
}

fn shallow_prompt(text: &str, date: &str) -> String {
    format!(
        r#"Extract from: "{text}"
Date: {date}

Types: appointment, life_event, highlight
Intent: statement, question, request
Emotion: happy, neutral, stressed, excited
Status: past, current, future

JSON format:
{{"events": [{{"type": "life_event", "topic": "brief_desc", "date": "YYYY-MM-DD", "people": [], "location": null, "status": "past", "emotion": "neutral"}}], "intent": "statement", "emotion": "neutral", "keywords": ["key1", "key2"]}}

Return ONLY valid JSON."#
    )
}

fn deep_prompt(text: &str, date: &str, conversation: Option<&str>) -> String {
    let context = conversation
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| {
            let snippet: String = c.chars().take(CONTEXT_SNIPPET_CHARS).collect();
            format!("\nContext: {}...", quote(&snippet))
        })
        .unwrap_or_default();

    format!(
        r#"COMPREHENSIVE ANALYSIS: "{text}"{context}
Date: {date}

Extract ALL relevant information:
1. EVENTS (appointments, life_events, highlights, plans)
2. INTENT (question, request, statement, memory_recall, instruction)
3. EMOTIONAL STATE (emotion, intensity, confidence)
4. CONTEXT KEYWORDS
5. FOLLOW-UP questions worth asking later

Types:
- appointment: Time-specific events
- life_event: Social/emotional events
- highlight: Thoughts, feelings, information

JSON format:
{{
  "events": [{{
    "type": "life_event",
    "topic": "activity_description",
    "date": "{date}",
    "time": null,
    "emotion": "neutral",
    "people": [],
    "location": null,
    "details": "additional_info",
    "status": "past"
  }}],
  "intent": "statement",
  "emotional_state": {{
    "primary_emotion": "neutral",
    "intensity": 0.5,
    "confidence": 0.8
  }},
  "context_keywords": ["keyword1", "keyword2"],
  "follow_up_potential": []
}}

Return ONLY valid JSON."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestKind;

    #[test]
    fn test_prompts_grow_with_tier() {
        let request = Request::new("u", "I met Anna at the station", RequestKind::UserInput);
        let builder = TieredPromptBuilder;
        let fast = builder.build(&request, Tier::Fast);
        let shallow = builder.build(&request, Tier::Shallow);
        let deep = builder.build(&request, Tier::Deep);
        assert!(fast.len() < shallow.len());
        assert!(shallow.len() < deep.len());
        for prompt in [&fast, &shallow, &deep] {
            assert!(prompt.contains("I met Anna at the station"));
        }
        assert!(deep.contains("follow_up_potential"));
    }

    #[test]
    fn test_deep_prompt_truncates_conversation() {
        let long_context = "x".repeat(500);
        let request = Request::new("u", "hello there friend", RequestKind::UserInput)
            .with_context(CONVERSATION_CONTEXT_KEY, long_context);
        let deep = TieredPromptBuilder.build(&request, Tier::Deep);
        let expected = format!("Context: {}...", "x".repeat(CONTEXT_SNIPPET_CHARS));
        assert!(deep.contains(&expected));
        assert!(!deep.contains(&"x".repeat(CONTEXT_SNIPPET_CHARS + 1)));

        let shallow = TieredPromptBuilder.build(&request, Tier::Shallow);
        assert!(!shallow.contains("Context:"));
    }

    #[test]
    fn test_quotes_in_text_are_neutralized() {
        let request = Request::new("u", r#"she said "no" twice"#, RequestKind::UserInput);
        let prompt = TieredPromptBuilder.build(&request, Tier::Shallow);
        assert!(prompt.contains("she said 'no' twice"));
    }

    #[test]
    fn test_closures_are_prompt_builders() {
        let builder = |request: &Request, tier: Tier| format!("{tier}:{}", request.text());
        let request = Request::new("u", "abc", RequestKind::Background);
        assert_eq!(builder.build(&request, Tier::Deep), "deep:abc");
    }

    #[test]
    fn test_budgets() {
        let budgets = TierBudgets::default();
        assert_eq!(budgets.budget(Tier::Shallow), 256);
        assert_eq!(budgets.budget(Tier::Deep), 1024);
    }
}
