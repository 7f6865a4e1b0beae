// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IML v2 plan parsing and normalisation.

use iml_core::{Plan, PROTOCOL_VERSION};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Malformed JSON or type mismatch at parse time.
///
/// Schema errors are decided synchronously at submission and returned as a
/// terminal outcome without consuming a worker slot.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid plan JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("plan must be a JSON object")]
    NotAnObject,
    #[error("unsupported protocol_version {found:?} (expected {PROTOCOL_VERSION:?})")]
    UnsupportedVersion { found: String },
    #[error("duplicate action id {0:?}")]
    DuplicateActionId(String),
    #[error("action id must be non-empty")]
    EmptyActionId,
}

/// Parse and normalise a JSON document into a [`Plan`].
///
/// Normalisation fills protocol defaults (`target_node = "local"`,
/// `on_failure = "abort"`, empty `params`); uniqueness of action ids is
/// checked here because serde cannot express it. Graph-level invariants are
/// the validator's job.
pub fn parse_plan(value: Value) -> Result<Plan, SchemaError> {
    if !value.is_object() {
        return Err(SchemaError::NotAnObject);
    }
    let plan: Plan = serde_json::from_value(value)?;

    if plan.protocol_version != PROTOCOL_VERSION {
        return Err(SchemaError::UnsupportedVersion { found: plan.protocol_version });
    }

    let mut seen = HashSet::new();
    for action in &plan.actions {
        if action.id.is_empty() {
            return Err(SchemaError::EmptyActionId);
        }
        if !seen.insert(action.id.as_str()) {
            return Err(SchemaError::DuplicateActionId(action.id.clone()));
        }
    }

    Ok(plan)
}

/// Parse a plan from raw JSON text.
pub fn parse_plan_json(text: &str) -> Result<Plan, SchemaError> {
    parse_plan(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;
