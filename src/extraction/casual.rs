//! Small-talk detection.
//!
//! Greetings, acknowledgements and very short utterances carry no facts
//! worth extracting; they are answered on the fast path.
// Static regexes are compile-checked by the tests below.
#![allow(clippy::expect_used)]

use regex::Regex;
use std::sync::LazyLock;

/// Utterances with fewer words than this are always casual.
pub const MIN_CONTENT_WORDS: usize = 3;

static CASUAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(hi|hello|hey)\s*$",
        r"^(thanks?|thank\s+you)\s*$",
        r"^(bye|goodbye)\s*$",
        r"^(yes|yeah|yep|no|nope)\s*$",
        r"^(okay|ok|alright)\s*$",
        r"^how.+are.+you",
        r"^what.+about.+you",
        r"^nothing.+much\s*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static regex: casual pattern"))
    .collect()
});

/// True when `text` is pure small talk.
///
/// Matching runs on the lowercased, trimmed text.
#[must_use]
pub fn is_casual(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if CASUAL_PATTERNS.iter().any(|re| re.is_match(&lowered)) {
        return true;
    }
    lowered.split_whitespace().count() < MIN_CONTENT_WORDS
}
