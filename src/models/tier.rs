//! Extraction depth tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Extraction depth.
///
/// `Fast` never touches the backend; `Shallow` and `Deep` do, with growing
/// prompt budgets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Rule-based extraction on the caller thread.
    #[default]
    Fast,
    /// Short backend prompt.
    Shallow,
    /// Full backend prompt including conversation context.
    Deep,
}

impl Tier {
    /// Returns all tiers from cheapest to most expensive.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Fast, Self::Shallow, Self::Deep]
    }

    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Shallow => "shallow",
            Self::Deep => "deep",
        }
    }

    /// Parses a tier from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "shallow" => Some(Self::Shallow),
            "deep" => Some(Self::Deep),
            _ => None,
        }
    }

    /// Whether requests at this tier are dispatched to the backend.
    #[must_use]
    pub const fn uses_backend(self) -> bool {
        !matches!(self, Self::Fast)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
