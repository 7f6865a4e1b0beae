// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger definition and lifecycle state.

use crate::condition::TriggerCondition;
use iml_storage::TriggerRow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

iml_core::define_id! {
    /// Unique identifier for a registered trigger.
    pub struct TriggerId("trg-");
}

/// Trigger lifecycle.
///
/// ```text
/// register(enabled=false) → Inactive
/// register(enabled=true)  → Registered → Active
/// Active --fire--→ Fired → Active (re-arm)
/// Active --throttle--→ Throttled → Active
/// Active --watcher error--→ Failed (manual re-enable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Registered,
    Inactive,
    Active,
    /// Composite trigger holding a partial match.
    Watching,
    Throttled,
    Fired,
    Failed,
}

iml_core::simple_display! {
    TriggerState {
        Registered => "registered",
        Inactive => "inactive",
        Active => "active",
        Watching => "watching",
        Throttled => "throttled",
        Fired => "fired",
        Failed => "failed",
    }
}

impl TriggerState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(Self::Registered),
            "inactive" => Some(Self::Inactive),
            "active" => Some(Self::Active),
            "watching" => Some(Self::Watching),
            "throttled" => Some(Self::Throttled),
            "fired" => Some(Self::Fired),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Default for TriggerState {
    fn default() -> Self {
        TriggerState::Registered
    }
}

/// Urgency of a trigger's fires; `Critical` sorts first and may preempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Default for TriggerPriority {
    fn default() -> Self {
        TriggerPriority::Normal
    }
}

iml_core::simple_display! {
    TriggerPriority {
        Critical => "critical",
        High => "high",
        Normal => "normal",
        Low => "low",
        Background => "background",
    }
}

/// Per-trigger rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throttle {
    /// Cooldown between consecutive fires.
    #[serde(default)]
    pub min_interval_seconds: u64,
    /// Sliding-window budget.
    #[serde(default = "default_max_fires")]
    pub max_fires_per_hour: u32,
}

fn default_max_fires() -> u32 {
    60
}

impl Default for Throttle {
    fn default() -> Self {
        Self { min_interval_seconds: 0, max_fires_per_hour: default_max_fires() }
    }
}

/// What to do when another trigger holds this trigger's resource lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Wait for the lock (bounded), else drop the fire.
    Queue,
    /// Cancel the holder, then take the lock.
    Preempt,
    /// Drop the fire.
    Reject,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::Queue
    }
}

/// Operational counters, updated by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerHealth {
    #[serde(default)]
    pub fire_count: u64,
    #[serde(default)]
    pub fail_count: u64,
    #[serde(default)]
    pub throttle_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Exponential moving average of fire-to-completion latency.
    #[serde(default)]
    pub latency_ema_ms: f64,
}

/// EMA smoothing factor.
const EMA_ALPHA: f64 = 0.3;

impl TriggerHealth {
    /// Record one completed fire and fold its latency into the EMA.
    pub fn record_fire(&mut self, latency_ms: u64) {
        self.fire_count += 1;
        if self.fire_count == 1 {
            self.latency_ema_ms = latency_ms as f64;
        } else {
            self.latency_ema_ms =
                EMA_ALPHA * latency_ms as f64 + (1.0 - EMA_ALPHA) * self.latency_ema_ms;
        }
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.fail_count += 1;
        self.last_error = Some(error.into());
    }

    pub fn record_throttle(&mut self) {
        self.throttle_count += 1;
    }
}

fn default_max_chain_depth() -> u32 {
    5
}

/// A persistent rule that submits a plan when its condition fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub trigger_id: TriggerId,
    pub name: String,
    #[serde(default)]
    pub state: TriggerState,
    #[serde(default)]
    pub enabled: bool,
    pub condition: TriggerCondition,
    /// Parameterised IML plan submitted on fire; a fresh `plan_id` is
    /// injected per fire.
    pub plan_template: Value,
    #[serde(default)]
    pub priority: TriggerPriority,
    #[serde(default)]
    pub throttle: Throttle,
    /// Named mutex shared across triggers for mutually-exclusive plans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_lock: Option<String>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,
    /// Trigger-to-trigger registrations along this trigger's causal chain.
    #[serde(default)]
    pub chain_depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub health: TriggerHealth,
}

impl TriggerDefinition {
    /// Serialise into a store row. The row's scalar columns mirror the
    /// definition at save time.
    pub fn to_row(&self, created_at_ms: u64, updated_at_ms: u64) -> TriggerRow {
        TriggerRow {
            trigger_id: self.trigger_id.to_string(),
            name: self.name.clone(),
            state: self.state.to_string(),
            enabled: self.enabled,
            definition: serde_json::to_value(self).unwrap_or(Value::Null),
            created_at_ms,
            updated_at_ms,
            expires_at_ms: self.expires_at_ms,
        }
    }

    /// Rehydrate from a store row.
    ///
    /// The `state` and `enabled` columns are authoritative and override
    /// whatever the serialised definition claims.
    pub fn from_row(row: &TriggerRow) -> Option<Self> {
        let mut def: TriggerDefinition = serde_json::from_value(row.definition.clone()).ok()?;
        if let Some(state) = TriggerState::parse(&row.state) {
            def.state = state;
        }
        def.enabled = row.enabled;
        def.expires_at_ms = row.expires_at_ms;
        Some(def)
    }
}

iml_core::builder! {
    pub struct TriggerDefinitionBuilder => TriggerDefinition {
        into {
            name: String = "test trigger",
        }
        set {
            state: TriggerState = TriggerState::Registered,
            enabled: bool = true,
            condition: TriggerCondition = crate::condition::TriggerCondition::Temporal {
                schedule: crate::condition::TemporalSchedule::Interval { seconds: 60 },
            },
            plan_template: Value = serde_json::json!({
                "protocol_version": "2.0",
                "description": "trigger plan",
                "plan_mode": "direct",
                "actions": [],
            }),
            priority: TriggerPriority = TriggerPriority::Normal,
            throttle: Throttle = Throttle::default(),
            conflict_policy: ConflictPolicy = ConflictPolicy::Queue,
            max_chain_depth: u32 = 5,
            chain_depth: u32 = 0,
            health: TriggerHealth = TriggerHealth::default(),
            tags: Vec<String> = Vec::new(),
        }
        option {
            resource_lock: String = None,
            expires_at_ms: u64 = None,
        }
        computed {
            trigger_id: TriggerId = TriggerId::new(),
        }
    }
}

#[cfg(test)]
#[path = "definition_tests.rs"]
mod tests;
