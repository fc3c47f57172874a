//! Bounded slot pools.
//!
//! Caps how many callers may hold a slot at once. Used for backend
//! connections, the deep-tier single-flight gate and the background lane.
//!
//! Slots are permits of a [`tokio::sync::Semaphore`]. Alongside the
//! semaphore the pool remembers when each slot was taken: a slot held longer
//! than `stuck_after` is considered leaked and its permit is replaced, so a
//! wedged call cannot shrink the pool forever. The leaked permit is
//! forgotten when its holder finally lets go.

use super::BackendError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pause between permit attempts while waiting.
const ACQUIRE_POLL: Duration = Duration::from_millis(2);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum slots held at once.
    ///
    /// Default: 2 (a local generation server serializes work anyway).
    pub max_concurrent: usize,
    /// How long to wait for a free slot.
    ///
    /// Default: 30 seconds.
    pub queue_wait_timeout: Duration,
    /// Age after which a held slot is treated as leaked. `None` disables
    /// reclamation.
    ///
    /// Default: 5 minutes.
    pub stuck_after: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_wait_timeout: Duration::from_secs(30),
            stuck_after: Some(Duration::from_secs(300)),
        }
    }
}

impl PoolConfig {
    /// Sets the maximum concurrent slots (minimum 1).
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Sets the queue wait timeout.
    #[must_use]
    pub const fn with_queue_wait_timeout(mut self, timeout: Duration) -> Self {
        self.queue_wait_timeout = timeout;
        self
    }

    /// Sets the leaked-slot age.
    #[must_use]
    pub const fn with_stuck_after(mut self, stuck_after: Option<Duration>) -> Self {
        self.stuck_after = stuck_after;
        self
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured maximum.
    pub max_concurrent: usize,
    /// Slots currently held.
    pub in_use: usize,
    /// Slots free right now.
    pub available: usize,
    /// Leaked slots reclaimed so far.
    pub reclaimed: u64,
    /// Forced resets so far.
    pub resets: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    held: HashMap<u64, Instant>,
    next_id: u64,
    reclaimed: u64,
    resets: u64,
}

#[derive(Debug)]
struct PoolShared {
    name: &'static str,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_available(&self) {
        metrics::gauge!("backend_pool_available_slots", "pool" => self.name)
            .set(self.semaphore.available_permits() as f64);
    }

    /// Takes a permit if one is free and registers it.
    fn try_take(self: &Arc<Self>) -> Option<Slot> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.held.insert(id, Instant::now());
        drop(state);
        self.publish_available();
        Some(Slot {
            id,
            permit: Some(permit),
            pool: Arc::clone(self),
        })
    }

    /// Drops registrations older than `stuck_after` and hands their permits
    /// back to the semaphore.
    fn reclaim(&self) -> usize {
        let Some(stuck_after) = self.config.stuck_after else {
            return 0;
        };
        let mut state = self.lock();
        let before = state.held.len();
        state
            .held
            .retain(|_, acquired_at| acquired_at.elapsed() < stuck_after);
        let reclaimed = before - state.held.len();
        if reclaimed > 0 {
            state.reclaimed += reclaimed as u64;
            self.semaphore.add_permits(reclaimed);
            drop(state);
            tracing::warn!(
                pool = self.name,
                reclaimed,
                "Reclaimed slots held past the stuck threshold"
            );
            self.publish_available();
        }
        reclaimed
    }
}

/// Bounded pool of slots.
#[derive(Debug, Clone)]
pub struct SlotPool {
    shared: Arc<PoolShared>,
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct Slot {
    id: u64,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolShared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let mut state = self.pool.lock();
        if state.held.remove(&self.id).is_some() {
            drop(permit);
        } else {
            // Reclaimed or reset: a replacement permit was already added.
            permit.forget();
        }
        drop(state);
        self.pool.publish_available();
    }
}

impl SlotPool {
    /// Creates a pool.
    #[must_use]
    pub fn new(name: &'static str, config: PoolConfig) -> Self {
        let config = PoolConfig {
            max_concurrent: config.max_concurrent.max(1),
            ..config
        };
        Self {
            shared: Arc::new(PoolShared {
                name,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                config,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Acquires a slot, waiting up to `wait`.
    ///
    /// On timeout, leaked slots are reclaimed for later callers and this
    /// caller gets [`BackendError::QueueTimeout`].
    pub fn acquire(&self, wait: Duration) -> Result<Slot, BackendError> {
        let shared = &self.shared;
        let started = Instant::now();
        loop {
            if let Some(slot) = shared.try_take() {
                return Ok(slot);
            }
            let waited = started.elapsed();
            if waited >= wait {
                break;
            }
            std::thread::sleep(ACQUIRE_POLL.min(wait - waited));
        }

        let reclaimed = shared.reclaim();
        metrics::counter!("backend_pool_queue_timeouts_total", "pool" => shared.name).increment(1);
        tracing::warn!(
            pool = shared.name,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            reclaimed,
            "Timed out waiting for a slot"
        );
        Err(BackendError::QueueTimeout(wait))
    }

    /// Reclaims slots held longer than `stuck_after`. Returns how many.
    pub fn reclaim_stuck(&self) -> usize {
        self.shared.reclaim()
    }

    /// Forgets every held slot.
    ///
    /// Current holders keep running but no longer count against the limit.
    pub fn force_reset(&self) {
        let mut state = self.shared.lock();
        let dropped = state.held.len();
        state.held.clear();
        state.resets += 1;
        self.shared.semaphore.add_permits(dropped);
        drop(state);
        self.shared.publish_available();
        tracing::info!(pool = self.shared.name, dropped, "Slot pool force reset");
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            max_concurrent: self.shared.config.max_concurrent,
            in_use: state.held.len(),
            available: self.shared.semaphore.available_permits(),
            reclaimed: state.reclaimed,
            resets: state.resets,
        }
    }
}
