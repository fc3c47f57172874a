//! Deep-tier rate limiting.
//!
//! Deep extractions are the most expensive calls and the ones most prone to
//! runaway repetition. Two sliding windows bound them: one per cache key and
//! one across the whole process. A throttled request is downgraded, never
//! rejected.

use crate::cache::CacheKey;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Width of the global window.
pub const GLOBAL_WINDOW: Duration = Duration::from_secs(60);

/// Verdict of [`DeepTierLimiter::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepAdmission {
    /// The request may run at Deep tier; the attempt was recorded.
    Admitted,
    /// The same key ran Deep within the per-key window.
    KeyThrottled,
    /// The process-wide budget for the current minute is spent.
    GlobalThrottled,
}

impl DeepAdmission {
    /// Returns the verdict as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::KeyThrottled => "key_throttled",
            Self::GlobalThrottled => "global_throttled",
        }
    }
}

/// Per-key and global sliding windows over Deep admissions.
///
/// Lock order is always per-key map, then global log.
#[derive(Debug)]
pub struct DeepTierLimiter {
    key_window: Duration,
    global_max: usize,
    per_key: Mutex<HashMap<CacheKey, Instant>>,
    global: Mutex<VecDeque<Instant>>,
}

impl DeepTierLimiter {
    /// Allows one Deep run per key per `key_window` and `global_max` runs
    /// per [`GLOBAL_WINDOW`] (minimum 1).
    #[must_use]
    pub fn new(key_window: Duration, global_max: usize) -> Self {
        Self {
            key_window,
            global_max: global_max.max(1),
            per_key: Mutex::new(HashMap::new()),
            global: Mutex::new(VecDeque::new()),
        }
    }

    /// Checks both windows at `now` and records the run if admitted.
    pub fn try_admit(&self, key: &CacheKey, now: Instant) -> DeepAdmission {
        let mut per_key = self.lock_per_key();
        if per_key
            .get(key)
            .is_some_and(|last| now.saturating_duration_since(*last) < self.key_window)
        {
            return DeepAdmission::KeyThrottled;
        }

        let mut global = self.lock_global();
        while global
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= GLOBAL_WINDOW)
        {
            global.pop_front();
        }
        if global.len() >= self.global_max {
            return DeepAdmission::GlobalThrottled;
        }
        global.push_back(now);
        drop(global);

        per_key.insert(key.clone(), now);
        DeepAdmission::Admitted
    }

    /// Drops per-key entries older than the window. Returns how many.
    pub fn purge(&self, now: Instant) -> usize {
        let mut per_key = self.lock_per_key();
        let before = per_key.len();
        per_key.retain(|_, last| now.saturating_duration_since(*last) < self.key_window);
        before - per_key.len()
    }

    fn lock_per_key(&self) -> MutexGuard<'_, HashMap<CacheKey, Instant>> {
        self.per_key.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_global(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.global.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestKind;

    fn key(text: &str) -> CacheKey {
        CacheKey::new("owner", text, RequestKind::UserInput)
    }

    #[test]
    fn test_same_key_is_throttled_within_window() {
        let limiter = DeepTierLimiter::new(Duration::from_secs(120), 10);
        let now = Instant::now();
        assert_eq!(limiter.try_admit(&key("a"), now), DeepAdmission::Admitted);
        assert_eq!(
            limiter.try_admit(&key("a"), now + Duration::from_secs(119)),
            DeepAdmission::KeyThrottled
        );
        assert_eq!(
            limiter.try_admit(&key("a"), now + Duration::from_secs(121)),
            DeepAdmission::Admitted
        );
    }

    #[test]
    fn test_global_budget_slides() {
        let limiter = DeepTierLimiter::new(Duration::from_secs(120), 2);
        let now = Instant::now();
        assert_eq!(limiter.try_admit(&key("a"), now), DeepAdmission::Admitted);
        assert_eq!(limiter.try_admit(&key("b"), now), DeepAdmission::Admitted);
        assert_eq!(limiter.try_admit(&key("c"), now), DeepAdmission::GlobalThrottled);
        // A globally throttled key is not charged to its own window.
        assert_eq!(
            limiter.try_admit(&key("c"), now + GLOBAL_WINDOW),
            DeepAdmission::Admitted
        );
    }

    #[test]
    fn test_purge_drops_expired_keys() {
        let limiter = DeepTierLimiter::new(Duration::from_secs(1), 10);
        let now = Instant::now();
        let _ = limiter.try_admit(&key("a"), now);
        assert_eq!(limiter.purge(now), 0);
        assert_eq!(limiter.purge(now + Duration::from_secs(2)), 1);
    }
}
