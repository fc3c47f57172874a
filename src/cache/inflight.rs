//! Coalescing of identical in-flight requests.
//!
//! The first request for a key becomes the leader and does the work; any
//! identical request arriving while the leader runs (and within the dedup
//! window) becomes a follower and waits for the leader's outcome instead of
//! calling the backend again.

use super::CacheKey;
use crate::models::{ErrorKind, ExtractionOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Pause between checks while a follower waits.
const FOLLOW_POLL: Duration = Duration::from_millis(2);

#[derive(Debug)]
struct Inflight {
    started_at: Instant,
    outcome: watch::Sender<Option<ExtractionOutcome>>,
}

impl Inflight {
    fn new() -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            started_at: Instant::now(),
            outcome,
        }
    }

    /// Publishes the first outcome; later ones are ignored.
    fn publish(&self, outcome: ExtractionOutcome) {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
    }
}

type InflightMap = Arc<Mutex<HashMap<CacheKey, Arc<Inflight>>>>;

fn lock_map(map: &InflightMap) -> MutexGuard<'_, HashMap<CacheKey, Arc<Inflight>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of in-flight keys.
#[derive(Debug)]
pub struct InflightRegistry {
    window: Duration,
    entries: InflightMap,
}

/// Result of [`InflightRegistry::claim`].
#[derive(Debug)]
pub enum Claim {
    /// Nobody is working on the key; the caller must do the work.
    Leader(LeaderGuard),
    /// Another caller is working on the key.
    Follower(FollowerHandle),
}

impl InflightRegistry {
    /// Creates a registry that coalesces within `window` of the leader
    /// starting.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Claims `key`.
    ///
    /// A marker older than the window is treated as abandoned and replaced,
    /// so a hung leader cannot block its key forever.
    pub fn claim(&self, key: &CacheKey) -> Claim {
        let mut entries = lock_map(&self.entries);
        if let Some(existing) = entries.get(key) {
            if existing.started_at.elapsed() < self.window {
                return Claim::Follower(FollowerHandle {
                    outcome: existing.outcome.subscribe(),
                });
            }
            tracing::debug!(key = %key, "Replacing stale in-flight marker");
        }

        let entry = Arc::new(Inflight::new());
        entries.insert(key.clone(), Arc::clone(&entry));
        drop(entries);
        Claim::Leader(LeaderGuard {
            key: key.clone(),
            entry,
            entries: Arc::clone(&self.entries),
            completed: false,
        })
    }

    /// Number of keys currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        lock_map(&self.entries).len()
    }

    /// True when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops markers older than the window. Returns how many.
    pub fn purge_stale(&self) -> usize {
        let mut entries = lock_map(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.started_at.elapsed() < self.window);
        before - entries.len()
    }
}

/// Held by the leader; publishes the outcome to followers.
///
/// Dropping the guard without calling [`LeaderGuard::complete`] publishes a
/// timeout failure so followers never wait on a vanished leader.
#[derive(Debug)]
pub struct LeaderGuard {
    key: CacheKey,
    entry: Arc<Inflight>,
    entries: InflightMap,
    completed: bool,
}

impl LeaderGuard {
    /// Key being led.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Publishes `outcome` to all followers and releases the key.
    pub fn complete(mut self, outcome: ExtractionOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: ExtractionOutcome) {
        if self.completed {
            return;
        }
        self.completed = true;
        {
            let mut entries = lock_map(&self.entries);
            // The marker may already belong to a newer leader.
            if entries
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.entry))
            {
                entries.remove(&self.key);
            }
        }
        self.entry.publish(outcome);
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(key = %self.key, "In-flight leader dropped without an outcome");
            self.finish(ExtractionOutcome::failure(ErrorKind::Timeout));
        }
    }
}

/// Held by a follower; waits for the leader's outcome.
#[derive(Debug)]
pub struct FollowerHandle {
    outcome: watch::Receiver<Option<ExtractionOutcome>>,
}

impl FollowerHandle {
    /// Waits up to `timeout` for the leader. `None` on timeout.
    pub fn wait(self, timeout: Duration) -> Option<ExtractionOutcome> {
        let started = Instant::now();
        loop {
            if let Some(outcome) = self.outcome.borrow().clone() {
                return Some(outcome);
            }
            // Sender gone: whatever it left behind is final.
            if self.outcome.has_changed().is_err() {
                return self.outcome.borrow().clone();
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return None;
            }
            std::thread::sleep(FOLLOW_POLL.min(timeout - waited));
        }
    }
}
