// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger condition types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// When a temporal trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalSchedule {
    /// Every `seconds`, drift-free.
    Interval { seconds: u64 },
    /// Standard cron expression (seconds field included).
    Cron { expression: String },
    /// Once at an absolute epoch-milliseconds timestamp, then terminal.
    Once { at_ms: u64 },
}

/// Filesystem event classes a watcher can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
}

fn all_fs_events() -> Vec<FsEventKind> {
    vec![FsEventKind::Created, FsEventKind::Modified, FsEventKind::Deleted]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessEventKind {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMetric {
    CpuPercent,
    MemoryPercent,
    DiskPercent,
}

/// How a composite combines its sub-conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeOp {
    /// All sub-conditions fire within `timeout_seconds` of the first.
    And,
    /// Any sub-condition fires.
    Or,
    /// No sub-condition fires for `silence_seconds`.
    Not,
    /// Sub-conditions fire in declared order within `timeout_seconds`.
    Seq,
    /// Any sub-condition fires `count` times inside a sliding
    /// `window_seconds`; fires once, then re-arms.
    Window,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_composite_seconds() -> u64 {
    60
}

fn default_window_count() -> u32 {
    3
}

/// Discriminated union of everything a trigger can watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    Temporal {
        schedule: TemporalSchedule,
    },
    Filesystem {
        path: PathBuf,
        #[serde(default)]
        recursive: bool,
        #[serde(default = "all_fs_events")]
        events: Vec<FsEventKind>,
    },
    Process {
        process_name: String,
        event: ProcessEventKind,
        #[serde(default = "default_poll_interval")]
        poll_interval_seconds: u64,
    },
    Resource {
        metric: ResourceMetric,
        threshold_percent: f64,
        /// The threshold must hold continuously this long.
        duration_seconds: u64,
        #[serde(default = "default_poll_interval")]
        poll_interval_seconds: u64,
    },
    Composite {
        op: CompositeOp,
        conditions: Vec<TriggerCondition>,
        #[serde(default = "default_composite_seconds")]
        timeout_seconds: u64,
        #[serde(default = "default_composite_seconds")]
        silence_seconds: u64,
        #[serde(default = "default_window_count")]
        count: u32,
        #[serde(default = "default_composite_seconds")]
        window_seconds: u64,
    },
}

impl TriggerCondition {
    /// Composite triggers hold partial matches; everything else arms directly.
    pub fn is_composite(&self) -> bool {
        matches!(self, TriggerCondition::Composite { .. })
    }

    /// A one-shot condition never re-arms after firing.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, TriggerCondition::Temporal { schedule: TemporalSchedule::Once { .. } })
    }
}

#[cfg(test)]
#[path = "condition_tests.rs"]
mod tests;
