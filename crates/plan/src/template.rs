// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Late-binding template resolution.
//!
//! Invoked immediately before dispatch for each action. Three sigils are
//! recognised inside string leaves of the params document:
//!
//! - `{{result.<action_id>.<path>}}`: output of a completed predecessor
//! - `{{memory.<key>}}`: per-session KV store
//! - `{{env.<var>}}`: process environment
//!
//! A leaf whose entire value is a single template is replaced by the
//! referent's native JSON type; otherwise the referents are stringified and
//! concatenated in place.

use iml_core::{ActionRecord, ActionState};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

/// Pattern for `{{result.X.path}}`, `{{memory.key}}`, `{{env.VAR}}`.
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
pub static TEMPLATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(result|memory|env)\.([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}")
        .expect("constant regex pattern is valid")
});

/// Errors raised while resolving templates for one action.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// `PRECONDITION_VIOLATED`: the referenced predecessor has not completed.
    #[error("referenced action {0:?} has not completed")]
    PreconditionViolated(String),
    #[error("referenced action {action:?} produced no value at path {path:?}")]
    MissingResultPath { action: String, path: String },
    #[error("memory key {0:?} is not set")]
    MissingMemoryKey(String),
}

/// Read access to the per-session KV store.
pub trait MemoryReader: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
}

/// Memory reader for plans outside any session.
pub struct NoMemory;

impl MemoryReader for NoMemory {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }
}

/// Inputs available to one action's resolution pass.
pub struct ResolveInputs<'a> {
    /// Per-action runtime records of the same plan.
    pub records: &'a IndexMap<String, ActionRecord>,
    pub memory: &'a dyn MemoryReader,
    /// Fail on missing memory keys instead of substituting "".
    pub strict_memory: bool,
}

/// Resolve all template sigils through a params document.
///
/// Returns a new document; the input is never mutated.
pub fn resolve_params(params: &Value, inputs: &ResolveInputs<'_>) -> Result<Value, TemplateError> {
    match params {
        Value::String(s) => resolve_string(s, inputs),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_params(item, inputs)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve_params(item, inputs)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, inputs: &ResolveInputs<'_>) -> Result<Value, TemplateError> {
    // Whole-leaf template: preserve the referent's native type.
    if let Some(caps) = TEMPLATE_PATTERN.captures(s.trim()) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.trim().len()) {
            return resolve_one(&caps[1], &caps[2], inputs);
        }
    }

    if !TEMPLATE_PATTERN.is_match(s) {
        return Ok(Value::String(s.to_string()));
    }

    // Embedded templates: stringify each referent and concatenate.
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in TEMPLATE_PATTERN.captures_iter(s) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        out.push_str(&s[last..whole.start()]);
        let value = resolve_one(&caps[1], &caps[2], inputs)?;
        out.push_str(&stringify(&value));
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

fn resolve_one(
    sigil: &str,
    body: &str,
    inputs: &ResolveInputs<'_>,
) -> Result<Value, TemplateError> {
    match sigil {
        "result" => {
            let (action_id, path) = match body.split_once('.') {
                Some((id, path)) => (id, path),
                None => (body, ""),
            };
            let record = inputs
                .records
                .get(action_id)
                .ok_or_else(|| TemplateError::PreconditionViolated(action_id.to_string()))?;
            if record.state != ActionState::Completed {
                return Err(TemplateError::PreconditionViolated(action_id.to_string()));
            }
            let result = record
                .result
                .as_ref()
                .ok_or_else(|| TemplateError::MissingResultPath {
                    action: action_id.to_string(),
                    path: path.to_string(),
                })?;
            if path.is_empty() {
                return Ok(result.clone());
            }
            lookup_path(result, path).cloned().ok_or_else(|| TemplateError::MissingResultPath {
                action: action_id.to_string(),
                path: path.to_string(),
            })
        }
        "memory" => match inputs.memory.get(body) {
            Some(value) => Ok(value),
            None if inputs.strict_memory => Err(TemplateError::MissingMemoryKey(body.to_string())),
            None => Ok(Value::String(String::new())),
        },
        "env" => Ok(Value::String(std::env::var(body).unwrap_or_default())),
        _ => Ok(Value::String(format!("{{{{{sigil}.{body}}}}}"))),
    }
}

/// Walk a dotted path through a JSON document.
///
/// Object keys match by name; array segments must parse as indices.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
