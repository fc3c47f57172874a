//! Typo-tolerant string matching.

/// Levenshtein edit distance over chars.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Similarity ratio in `0.0..=1.0`: `1 - distance / longer_len`.
///
/// Two empty strings are identical.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Best match for `candidate` in `dictionary` at or above `threshold`.
///
/// Dictionary entries are compared in their normalized form (lowercase,
/// apostrophes and spaces removed); the returned value is the entry as
/// written.
#[must_use]
pub fn best_match<'a>(
    candidate: &str,
    dictionary: &[&'a str],
    threshold: f64,
) -> Option<(&'a str, f64)> {
    let candidate = squash(candidate);
    if candidate.is_empty() {
        return None;
    }
    dictionary
        .iter()
        .map(|entry| (*entry, similarity(&candidate, &squash(entry))))
        .filter(|(_, score)| *score >= threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Lowercases and drops everything that is not alphanumeric.
#[must_use]
pub fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
