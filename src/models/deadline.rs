//! Cancellable deadlines shared between a caller and its worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Upper bound used when a budget would overflow `Instant`.
const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Sleep granularity when waiting on a cancellable deadline.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// End-to-end time budget for one request.
///
/// Clones share the cancellation flag: when the caller gives up, every
/// clone reports zero time remaining.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(budget)
            .unwrap_or_else(|| now + MAX_BUDGET);
        Self {
            at,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Time left; zero once expired or cancelled.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        if self.is_cancelled() {
            return Duration::ZERO;
        }
        self.at.saturating_duration_since(Instant::now())
    }

    /// True once no time is left.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `limit`, shortened to what is left of the deadline.
    #[must_use]
    pub fn bound(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }

    /// Cancels the deadline for every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once [`Deadline::cancel`] was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` or until cancelled/expired.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let allowed = self.bound(duration);
        let wake_at = Instant::now() + allowed;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= wake_at {
                return allowed == duration;
            }
            std::thread::sleep(SLEEP_SLICE.min(wake_at - now));
        }
    }
}
