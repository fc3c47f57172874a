//! Process-wide single-flight gate for Deep-tier backend calls.

use crate::backend::{BackendError, PoolConfig, PoolStats, Slot, SlotPool};
use crate::models::Deadline;

/// At most one Deep-tier call runs at any instant.
///
/// The permit is a one-slot pool without leak reclamation: a permit is only
/// released by dropping it, so two Deep calls never overlap.
#[derive(Debug, Clone)]
pub struct DeepTierGate {
    pool: SlotPool,
}

impl Default for DeepTierGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DeepTierGate {
    /// Creates the gate.
    #[must_use]
    pub fn new() -> Self {
        let config = PoolConfig::default()
            .with_max_concurrent(1)
            .with_stuck_after(None);
        Self {
            pool: SlotPool::new("deep_gate", config),
        }
    }

    /// Waits for the permit until `deadline`.
    pub fn enter(&self, deadline: &Deadline) -> Result<Slot, BackendError> {
        self.pool.acquire(deadline.remaining())
    }

    /// True while a Deep call holds the permit.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.pool.stats().in_use > 0
    }

    /// Gate statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_entry_waits_for_release() {
        let gate = DeepTierGate::new();
        let first = gate.enter(&Deadline::after(Duration::from_secs(1)));
        assert!(first.is_ok());
        assert!(gate.is_busy());
        assert!(matches!(
            gate.enter(&Deadline::after(Duration::from_millis(20))),
            Err(BackendError::QueueTimeout(_))
        ));
        drop(first);
        assert!(!gate.is_busy());
        assert!(gate.enter(&Deadline::after(Duration::from_millis(20))).is_ok());
    }
}
