// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-plan execution state machine.

use crate::plan::{Plan, PlanId};
use crate::session::SessionId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Lifecycle state of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Not yet accepted into a wave.
    Pending,
    /// In the current wave; awaiting permission, templates, a module slot,
    /// or an approval decision.
    Waiting,
    Running,
    Completed,
    Failed,
    /// Removed from execution by cascade policy or cancellation.
    Skipped,
    /// Compensation body ran after the plan failed.
    RolledBack,
}

crate::simple_display! {
    ActionState {
        Pending => "pending",
        Waiting => "waiting",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
        RolledBack => "rolled_back",
    }
}

impl ActionState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Completed
                | ActionState::Failed
                | ActionState::Skipped
                | ActionState::RolledBack
        )
    }

    /// Whether the state machine permits `self → next`.
    ///
    /// A Waiting action can fail directly: template resolution, the
    /// permission re-check, and approval rejection all happen before the
    /// action ever runs. The only edge out of a terminal state is the
    /// rollback sweep's `Completed → RolledBack`.
    pub fn can_transition_to(&self, next: ActionState) -> bool {
        use ActionState::*;
        matches!(
            (self, next),
            (Pending, Waiting)
                | (Pending, Skipped)
                | (Waiting, Running)
                | (Waiting, Failed)
                | (Waiting, Skipped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Skipped)
                | (Completed, RolledBack)
        )
    }
}

/// Aggregate status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Refused before any action ran; see `rejection_details`.
    Rejected,
}

crate::simple_display! {
    PlanStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
        Rejected => "rejected",
    }
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Succeeded
                | PlanStatus::Failed
                | PlanStatus::Cancelled
                | PlanStatus::Rejected
        )
    }
}

/// Which admission gate refused the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionSource {
    ScannerPipeline,
    IntentVerifier,
    PermissionGuard,
    RateLimiter,
}

crate::simple_display! {
    RejectionSource {
        ScannerPipeline => "scanner_pipeline",
        IntentVerifier => "intent_verifier",
        PermissionGuard => "permission_guard",
        RateLimiter => "rate_limiter",
    }
}

/// Structured diagnosis returned when a plan is refused before execution.
///
/// `scanner_findings` round-trips verbatim through the state store so the
/// SDK can format whatever the scanners produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionDetails {
    pub source: RejectionSource,
    pub verdict: String,
    pub risk_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threat_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scanner_findings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clarification_needed: bool,
}

/// Runtime record for one action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub state: ActionState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    /// Sanitised module output, present once Completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recorded when the compensation body itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
}

impl Default for ActionState {
    fn default() -> Self {
        ActionState::Pending
    }
}

/// Errors from illegal state-machine use.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("action {action}: illegal transition {from} → {to}")]
    InvalidTransition { action: String, from: ActionState, to: ActionState },
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Per-plan runtime record: aggregate status plus per-action state.
///
/// Owned exclusively by the executor while the plan is Running; persisted
/// on every transition so it survives restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    /// Keyed by action id, preserving plan declaration order.
    pub actions: IndexMap<String, ActionRecord>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_details: Option<RejectionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ExecutionState {
    /// Seed a Queued record with one Pending entry per action, in plan order.
    pub fn new(plan: &Plan, created_at_ms: u64) -> Self {
        let actions = plan
            .actions
            .iter()
            .map(|a| (a.id.clone(), ActionRecord::default()))
            .collect();
        Self {
            plan_id: plan.plan_id,
            status: PlanStatus::Queued,
            actions,
            created_at_ms,
            started_at_ms: None,
            ended_at_ms: None,
            rejection_details: None,
            session_id: plan.session_id,
            correlation_id: plan.correlation_id.clone(),
        }
    }

    /// Mark the whole plan rejected before execution.
    pub fn reject(&mut self, details: RejectionDetails, epoch_ms: u64) {
        self.status = PlanStatus::Rejected;
        self.rejection_details = Some(details);
        self.ended_at_ms = Some(epoch_ms);
    }

    pub fn action(&self, id: &str) -> Option<&ActionRecord> {
        self.actions.get(id)
    }

    /// Transition an action, enforcing the state machine and stamping times.
    pub fn transition(
        &mut self,
        id: &str,
        next: ActionState,
        epoch_ms: u64,
    ) -> Result<(), StateError> {
        let record = self
            .actions
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownAction(id.to_string()))?;
        if !record.state.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                action: id.to_string(),
                from: record.state,
                to: next,
            });
        }
        if next == ActionState::Running && record.started_at_ms.is_none() {
            record.started_at_ms = Some(epoch_ms);
        }
        if next.is_terminal() && next != ActionState::RolledBack {
            record.ended_at_ms = Some(epoch_ms);
        }
        record.state = next;
        Ok(())
    }

    /// All actions terminal?
    pub fn is_settled(&self) -> bool {
        self.actions.values().all(|r| r.state.is_terminal())
    }

    /// Count of actions currently in a given state.
    pub fn count_in(&self, state: ActionState) -> usize {
        self.actions.values().filter(|r| r.state == state).count()
    }

    /// Derive the terminal plan status once all actions are settled.
    ///
    /// Failed or Skipped actions mean the plan failed; a plan with every
    /// action Completed succeeded.
    pub fn derive_outcome(&self) -> PlanStatus {
        let any_bad = self
            .actions
            .values()
            .any(|r| matches!(r.state, ActionState::Failed | ActionState::Skipped));
        if any_bad {
            PlanStatus::Failed
        } else {
            PlanStatus::Succeeded
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
