// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon → client responses.

use iml_core::{ExecutionState, UniversalEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Daemon liveness summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_ms: u64,
    pub triggers_enabled: bool,
    pub modules: Vec<String>,
}

/// Typed reply envelope.
///
/// Errors are structural (kind + message + recommendations) so the SDK can
/// format them for the model; a stack trace never crosses this boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Error { kind: String, message: String, #[serde(default)] recommendations: Vec<String> },
    Plan { state: ExecutionState },
    Plans { states: Vec<ExecutionState> },
    Group { result: Value },
    Modules { manifests: Vec<Value> },
    ActionSchema { schema: Value },
    Events { events: Vec<UniversalEvent> },
    Triggers { triggers: Vec<Value> },
    Trigger { definition: Value },
    Approvals { approvals: Vec<Value> },
    Context { prompt: String },
    Status { status: DaemonStatus },
}

impl Response {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            kind: kind.into(),
            message: message.into(),
            recommendations: Vec::new(),
        }
    }

    pub fn error_with_hints(
        kind: impl Into<String>,
        message: impl Into<String>,
        recommendations: Vec<String>,
    ) -> Self {
        Response::Error { kind: kind.into(), message: message.into(), recommendations }
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
