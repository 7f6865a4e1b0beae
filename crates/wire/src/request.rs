// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client → daemon requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a client can ask the daemon to do.
///
/// Plans, trigger definitions, and approval decisions travel as raw JSON;
/// the daemon parses and validates them, the wire layer only frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Submit an IML plan and wait for its terminal state.
    SubmitPlan { plan: Value },
    GetPlan { plan_id: String },
    CancelPlan { plan_id: String },
    /// Resolve an approval gate.
    Approve { plan_id: String, action_id: String, decision: Value },
    ListApprovals,
    /// Fan-out submission of several plans.
    SubmitGroup { plans: Vec<Value>, max_concurrent: usize },
    ListPlans { limit: usize },
    ListModules,
    GetModule { module_id: String },
    GetActionSchema { module_id: String, action: String },
    RecentEvents { pattern: Option<String>, limit: usize },
    /// Model-facing system prompt describing the daemon's capabilities.
    GetContext,
    ListTriggers,
    GetTrigger { trigger_id: String },
    RegisterTrigger { definition: Value },
    DeleteTrigger { trigger_id: String },
    ActivateTrigger { trigger_id: String },
    DeactivateTrigger { trigger_id: String },
    Status,
    Shutdown,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
