//! Cache keys derived from normalized request content.

use crate::models::{Request, RequestKind};
use sha2::{Digest, Sha256};
use std::fmt;

/// Field separator inside the hashed key material.
const SEPARATOR: u8 = 0x1f;

/// Normalized identity of a request: SHA256 over owner, normalized text and
/// kind.
///
/// Two requests that differ only in case or whitespace map to the same key.
///
/// # Example
///
/// ```rust
/// use extractd::cache::CacheKey;
/// use extractd::models::RequestKind;
///
/// let a = CacheKey::new("alice", "I went to  McDonald's", RequestKind::UserInput);
/// let b = CacheKey::new("alice", "i went to mcdonald's ", RequestKind::UserInput);
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Computes the key for the given parts.
    #[must_use]
    pub fn new(owner: &str, text: &str, kind: RequestKind) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner.trim().as_bytes());
        hasher.update([SEPARATOR]);
        hasher.update(normalize(text).as_bytes());
        hasher.update([SEPARATOR]);
        hasher.update(kind.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Computes the key for a request.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self::new(request.owner(), request.text(), request.kind())
    }

    /// Full hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Normalizes text for hashing: trimmed, lowercased, whitespace collapsed.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Hello   WORLD \n again "), "hello world again");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_key_depends_on_owner_and_kind() {
        let base = CacheKey::new("alice", "went home", RequestKind::UserInput);
        assert_ne!(base, CacheKey::new("bob", "went home", RequestKind::UserInput));
        assert_ne!(base, CacheKey::new("alice", "went home", RequestKind::Background));
        assert_eq!(base, CacheKey::new("alice", "Went  Home", RequestKind::UserInput));
    }

    #[test]
    fn test_separator_prevents_ambiguity() {
        assert_ne!(
            CacheKey::new("ab", "c", RequestKind::UserInput),
            CacheKey::new("a", "bc", RequestKind::UserInput)
        );
    }

    #[test]
    fn test_short_prefix() {
        let key = CacheKey::new("u", "t", RequestKind::UserInput);
        assert_eq!(key.short().len(), 12);
        assert!(key.as_str().starts_with(key.short()));
        assert_eq!(key.to_string(), key.short());
    }
}
