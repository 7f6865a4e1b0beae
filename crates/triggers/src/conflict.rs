// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource-lock conflict resolution.
//!
//! A resource lock is a named mutex shared across triggers: two triggers
//! holding the same lock never have running plans at the same time. The
//! map is in-memory only; locks do not survive a restart, and neither do
//! the running plans they guard.

use iml_core::PlanId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// How long a `queue`-policy fire waits for the lock before dropping.
pub const QUEUE_WAIT: Duration = Duration::from_secs(60);

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// The fire is dropped (policy `reject`, or `queue` timed out).
    Dropped,
}

/// In-memory `resource_lock → plan_id` table.
#[derive(Default)]
pub struct ConflictResolver {
    locks: Mutex<HashMap<String, PlanId>>,
    released: Arc<Notify>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of a lock.
    pub fn holder(&self, lock: &str) -> Option<PlanId> {
        self.locks.lock().get(lock).copied()
    }

    /// Take the lock if free.
    pub fn try_acquire(&self, lock: &str, plan_id: PlanId) -> bool {
        let mut locks = self.locks.lock();
        if locks.contains_key(lock) {
            return false;
        }
        locks.insert(lock.to_string(), plan_id);
        true
    }

    /// Release a lock iff `plan_id` still holds it.
    pub fn release(&self, lock: &str, plan_id: &PlanId) {
        let mut locks = self.locks.lock();
        if locks.get(lock) == Some(plan_id) {
            locks.remove(lock);
            tracing::debug!(lock, plan_id = %plan_id, "resource lock released");
        }
        drop(locks);
        self.released.notify_waiters();
    }

    /// Wait for the lock up to `QUEUE_WAIT`, else drop the fire.
    pub async fn acquire_queued(&self, lock: &str, plan_id: PlanId) -> LockOutcome {
        self.acquire_within(lock, plan_id, QUEUE_WAIT).await
    }

    /// Wait for the lock up to `timeout`, else drop the fire.
    pub async fn acquire_within(
        &self,
        lock: &str,
        plan_id: PlanId,
        timeout: Duration,
    ) -> LockOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire(lock, plan_id) {
                return LockOutcome::Acquired;
            }
            let notified = self.released.notified();
            // Re-check: the holder may have released between the failed
            // attempt and registering the waiter.
            if self.try_acquire(lock, plan_id) {
                return LockOutcome::Acquired;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return LockOutcome::Dropped,
            }
        }
    }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
