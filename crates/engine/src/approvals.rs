// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval gate plumbing.
//!
//! An action with `requires_approval` sits in Waiting while an entry lives
//! in this queue; the daemon surface resolves the entry and the executor's
//! suspended task picks the decision up. The queue is bounded so a stuck
//! operator cannot grow it without limit.

use iml_core::PlanId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;

/// Maximum outstanding approval gates across all plans.
const MAX_OUTSTANDING: usize = 64;

/// Caller's answer to an approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    /// Approve with replacement params for the gated action.
    ApproveWithChanges { params: Value },
    /// Pick one of the prompt's clarification options.
    Choose { option_index: usize },
    /// Leave the action waiting; the gate is re-armed.
    Defer,
}

/// One outstanding gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub plan_id: PlanId,
    pub action_id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_options: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no pending approval for plan {plan_id} action {action_id:?}")]
    NotFound { plan_id: PlanId, action_id: String },
    #[error("approval queue is full ({0} outstanding)")]
    QueueFull(usize),
}

struct Entry {
    request: ApprovalRequest,
    tx: oneshot::Sender<ApprovalDecision>,
}

/// Bounded queue of outstanding approvals keyed by `(plan_id, action_id)`.
#[derive(Default)]
pub struct ApprovalQueue {
    pending: Mutex<HashMap<(PlanId, String), Entry>>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gate and receive the decision channel.
    ///
    /// Registering again for the same key replaces the previous entry (its
    /// receiver resolves as dropped).
    pub fn register(
        &self,
        request: ApprovalRequest,
    ) -> Result<oneshot::Receiver<ApprovalDecision>, ApprovalError> {
        let mut pending = self.pending.lock();
        let key = (request.plan_id, request.action_id.clone());
        if pending.len() >= MAX_OUTSTANDING && !pending.contains_key(&key) {
            return Err(ApprovalError::QueueFull(pending.len()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(key, Entry { request, tx });
        Ok(rx)
    }

    /// Resolve a gate with the caller's decision.
    pub fn resolve(
        &self,
        plan_id: PlanId,
        action_id: &str,
        decision: ApprovalDecision,
    ) -> Result<(), ApprovalError> {
        let entry = self
            .pending
            .lock()
            .remove(&(plan_id, action_id.to_string()))
            .ok_or_else(|| ApprovalError::NotFound {
                plan_id,
                action_id: action_id.to_string(),
            })?;
        // A dropped receiver means the plan was cancelled meanwhile.
        let _ = entry.tx.send(decision);
        Ok(())
    }

    /// Outstanding requests, for the daemon surface.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut out: Vec<ApprovalRequest> =
            self.pending.lock().values().map(|e| e.request.clone()).collect();
        out.sort_by(|a, b| {
            (a.plan_id.as_str(), &a.action_id).cmp(&(b.plan_id.as_str(), &b.action_id))
        });
        out
    }

    /// Drop every gate belonging to a plan (on cancellation).
    pub fn drop_plan(&self, plan_id: &PlanId) {
        self.pending.lock().retain(|(pid, _), _| pid != plan_id);
    }
}

#[cfg(test)]
#[path = "approvals_tests.rs"]
mod tests;
