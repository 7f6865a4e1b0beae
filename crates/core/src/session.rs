// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session context carried across plans, triggers, and events.

use crate::event::UniversalEvent;
use crate::plan::PlanId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a model session.
    pub struct SessionId("ssn-");
}

/// Context bound to a plan for the duration of its execution.
///
/// Carries the originating session and, for trigger-launched plans, the
/// trigger lineage used by the chain-depth guard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Trigger that launched this plan, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// Trigger-to-trigger registrations along the causal chain so far.
    #[serde(default)]
    pub trigger_chain_depth: u32,
}

impl SessionContext {
    pub fn for_session(session_id: SessionId) -> Self {
        Self { session_id: Some(session_id), ..Self::default() }
    }
}

/// Binds `plan_id → session context` at submission, unbinds at termination.
///
/// Events emitted during a plan's execution are stamped with the bound
/// session fields so subscribers can reconstruct causality per session.
#[derive(Default)]
pub struct SessionContextPropagator {
    bindings: Mutex<HashMap<PlanId, SessionContext>>,
}

impl SessionContextPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, plan_id: PlanId, ctx: SessionContext) {
        self.bindings.lock().insert(plan_id, ctx);
    }

    pub fn unbind(&self, plan_id: &PlanId) {
        self.bindings.lock().remove(plan_id);
    }

    pub fn context(&self, plan_id: &PlanId) -> Option<SessionContext> {
        self.bindings.lock().get(plan_id).cloned()
    }

    /// Stamp an event with the session fields bound to `plan_id`.
    ///
    /// No-op when the plan has no binding (e.g. events after termination).
    pub fn stamp(&self, plan_id: &PlanId, event: &mut UniversalEvent) {
        if let Some(ctx) = self.context(plan_id) {
            event.session_id = ctx.session_id;
            if event.correlation_id.is_none() {
                event.correlation_id = ctx.correlation_id;
            }
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
