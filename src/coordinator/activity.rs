//! Owner activity tracking.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Remembers when each owner last spoke directly.
#[derive(Debug)]
pub struct ActivityTracker {
    window: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl ActivityTracker {
    /// Creates a tracker treating owners as active for `window` after their
    /// last input.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records activity for `owner` now.
    pub fn record(&self, owner: &str) {
        self.record_at(owner, Instant::now());
    }

    /// Records activity for `owner` at `at`.
    pub fn record_at(&self, owner: &str, at: Instant) {
        self.lock().insert(owner.to_string(), at);
    }

    /// True when `owner` was active within the window.
    #[must_use]
    pub fn is_recent(&self, owner: &str) -> bool {
        self.lock()
            .get(owner)
            .is_some_and(|seen| seen.elapsed() <= self.window)
    }

    /// Forgets owners idle for longer than the window. Returns how many.
    pub fn purge(&self) -> usize {
        let mut last_seen = self.lock();
        let before = last_seen.len();
        last_seen.retain(|_, seen| seen.elapsed() <= self.window);
        before - last_seen.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_activity() {
        let tracker = ActivityTracker::new(Duration::from_secs(60));
        assert!(!tracker.is_recent("alice"));
        tracker.record("alice");
        assert!(tracker.is_recent("alice"));
        assert!(!tracker.is_recent("bob"));
    }

    #[test]
    fn test_activity_expires_and_purges() {
        let tracker = ActivityTracker::new(Duration::from_millis(10));
        tracker.record("alice");
        std::thread::sleep(Duration::from_millis(30));
        assert!(!tracker.is_recent("alice"));
        assert_eq!(tracker.purge(), 1);
    }
}
