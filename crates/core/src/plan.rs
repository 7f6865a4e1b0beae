// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IML v2 plan and action shapes.
//!
//! Field names here are part of the wire protocol and must not drift from
//! the published IML v2 contract. A [`Plan`] is immutable once submitted;
//! all runtime bookkeeping lives in [`crate::state::ExecutionState`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Protocol version accepted by the parser.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Phases a compiled plan must carry evidence for, in order.
pub const REQUIRED_COMPILER_PHASES: [&str; 4] = ["parse", "analyze", "optimize", "emit"];

/// Unique identifier for a submitted plan.
///
/// The wire format is a canonical hyphenated UUID, per the IML v2 contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub crate::id::IdBuf);

impl PlanId {
    /// Generate a new random plan id (UUID v4).
    pub fn new() -> Self {
        Self(crate::id::IdBuf::new(&uuid::Uuid::new_v4().to_string()))
    }

    /// Create an id from an existing string (for parsing/deserialization).
    pub fn from_string(id: impl AsRef<str>) -> Self {
        Self(crate::id::IdBuf::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns a string slice truncated to at most `n` characters.
    pub fn short(&self, n: usize) -> &str {
        crate::id::short(self.0.as_str(), n)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

impl From<&str> for PlanId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for PlanId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for PlanId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl std::borrow::Borrow<str> for PlanId {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq<str> for PlanId {
    fn eq(&self, other: &str) -> bool {
        self.0.as_str() == other
    }
}

impl PartialEq<&str> for PlanId {
    fn eq(&self, other: &&str) -> bool {
        self.0.as_str() == *other
    }
}

/// How the plan was produced by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Authored directly as JSON.
    Direct,
    /// Produced by the plan compiler; must carry a [`CompilerTrace`].
    Compiled,
}

impl Default for PlanMode {
    fn default() -> Self {
        PlanMode::Direct
    }
}

crate::simple_display! {
    PlanMode {
        Direct => "direct",
        Compiled => "compiled",
    }
}

/// Evidence of one compiler phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerPhase {
    pub name: String,
    /// Free-form phase output retained for audit.
    #[serde(default)]
    pub detail: String,
}

/// Ordered record of the compiler phases that produced a compiled plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerTrace {
    #[serde(default)]
    pub phases: Vec<CompilerPhase>,
}

impl CompilerTrace {
    /// Look up a phase by name.
    pub fn phase(&self, name: &str) -> Option<&CompilerPhase> {
        self.phases.iter().find(|p| p.name == name)
    }
}

/// Retry policy for a single action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Base for exponential backoff: `backoff_seconds * 2^(attempt-1)`.
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
}

fn default_backoff_seconds() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1, backoff_seconds: 1.0 }
    }
}

/// Prompt shown when an approval gate pauses an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSpec {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_options: Vec<String>,
}

/// Screen-capture hints around an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceptionSpec {
    #[serde(default)]
    pub capture_before: bool,
    #[serde(default)]
    pub capture_after: bool,
}

/// Session-memory access declared by an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_keys: Vec<String>,
    /// Key the action's output is written to on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_key: Option<String>,
}

/// Compensation body executed during a rollback sweep.
///
/// Structurally an action invocation, but outside the main DAG: it has no
/// dependencies and no retry policy of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSpec {
    pub module: String,
    pub action: String,
    #[serde(default = "empty_object")]
    pub params: Value,
}

/// What happens to dependents when this action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Transitive dependents are skipped and the plan fails.
    Abort,
    /// Dependents stay eligible; the plan may still partially succeed.
    Continue,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

crate::simple_display! {
    FailurePolicy {
        Abort => "abort",
        Continue => "continue",
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_target_node() -> String {
    "local".to_string()
}

/// A single unit of work dispatched to a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique within the plan; referenced by `depends_on` and templates.
    pub id: String,
    pub module: String,
    pub action: String,
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Abstract node addressing; only "local" is executed by this host.
    #[serde(default = "default_target_node")]
    pub target_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perception: Option<PerceptionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackSpec>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Action {
    /// Effective retry policy (single attempt when none declared).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default()
    }
}

/// A directed acyclic graph of actions sharing a transaction-like outcome.
///
/// Immutable once submitted. Uniqueness of action ids and acyclicity are
/// enforced by the parser/validator, not by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub protocol_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plan_mode: PlanMode,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<crate::session::SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Run compensation bodies for completed actions when the plan fails.
    #[serde(default)]
    pub rollback_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_trace: Option<CompilerTrace>,
    /// Stamped at submission; not part of the model's identity.
    #[serde(default)]
    pub submitted_at_ms: u64,
}

impl Plan {
    /// Look up an action by id.
    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Action ids in declaration order.
    pub fn action_ids(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.id.as_str()).collect()
    }

    /// Map of action id → direct dependents, preserving declaration order.
    pub fn dependents(&self) -> HashMap<&str, Vec<&str>> {
        let mut out: HashMap<&str, Vec<&str>> = HashMap::new();
        for action in &self.actions {
            out.entry(action.id.as_str()).or_default();
            for dep in &action.depends_on {
                out.entry(dep.as_str()).or_default().push(action.id.as_str());
            }
        }
        out
    }

    /// Transitive dependents of `id` (not including `id` itself).
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let dependents = self.dependents();
        let mut seen = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for &next in dependents.get(current).into_iter().flatten() {
                if next != id && !seen.iter().any(|s: &String| s == next) {
                    seen.push(next.to_string());
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Transitive dependencies of `id` (not including `id` itself).
    pub fn transitive_dependencies(&self, id: &str) -> Vec<String> {
        let mut seen = Vec::new();
        let mut stack: Vec<&str> = match self.action(id) {
            Some(a) => a.depends_on.iter().map(String::as_str).collect(),
            None => Vec::new(),
        };
        while let Some(current) = stack.pop() {
            if seen.iter().any(|s: &String| s == current) {
                continue;
            }
            seen.push(current.to_string());
            if let Some(a) = self.action(current) {
                stack.extend(a.depends_on.iter().map(String::as_str));
            }
        }
        seen
    }
}

crate::builder! {
    pub struct ActionBuilder => Action {
        into {
            id: String = "a1",
            module: String = "filesystem",
            action: String = "read_file",
        }
        set {
            params: Value = empty_object(),
            depends_on: Vec<String> = Vec::new(),
            target_node: String = default_target_node(),
            requires_approval: bool = false,
            on_failure: FailurePolicy = FailurePolicy::Abort,
        }
        option {
            retry: RetryPolicy = None,
            approval: ApprovalSpec = None,
            perception: PerceptionSpec = None,
            memory: MemorySpec = None,
            rollback: RollbackSpec = None,
        }
    }
}

crate::builder! {
    pub struct PlanBuilder => Plan {
        into {
            protocol_version: String = PROTOCOL_VERSION,
            description: String = "test plan",
        }
        set {
            plan_mode: PlanMode = PlanMode::Direct,
            actions: Vec<Action> = Vec::new(),
            rollback_on_failure: bool = false,
            submitted_at_ms: u64 = 0,
        }
        option {
            session_id: crate::session::SessionId = None,
            correlation_id: String = None,
            compiler_trace: CompilerTrace = None,
        }
        computed {
            plan_id: PlanId = PlanId::new(),
        }
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
