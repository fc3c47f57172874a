//! Text analysis: everything that turns an utterance into facts without
//! coordinating work.
//!
//! - [`is_casual`]: small-talk filter
//! - [`PatternRuleSet`]: ordered zero-backend rules
//! - [`ComplexityClassifier`]: score and tier selection
//! - [`PromptBuilder`]: backend prompts per tier
//! - [`parse_model_output`]: lenient model output parsing

mod casual;
mod classifier;
pub mod fuzzy;
mod parse;
mod pattern;
mod prompt;

pub use casual::{MIN_CONTENT_WORDS, is_casual};
pub use classifier::{Classification, ComplexityClassifier, MAX_SCORE, TierThresholds};
pub use parse::parse_model_output;
pub use pattern::{
    KNOWN_PLACES, KnownPlace, KnownPlaceRule, PLACE_MATCH_THRESHOLD, PatternRule, PatternRuleSet,
    RegexBuilder, RegexRule, RuleFamily,
};
pub use prompt::{CONTEXT_SNIPPET_CHARS, PromptBuilder, TierBudgets, TieredPromptBuilder};
