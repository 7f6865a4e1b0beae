// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-profile capability checks.
//!
//! A profile declares allow-patterns over `(module, action)` and a set of
//! sandbox path roots. The plan-level check runs before scheduling; the
//! per-action check re-runs after template resolution because resolved
//! values can change allowability.

use iml_core::Plan;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Capability profile selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Readonly,
    LocalWorker,
    PowerUser,
    Unrestricted,
}

iml_core::simple_display! {
    Profile {
        Readonly => "readonly",
        LocalWorker => "local_worker",
        PowerUser => "power_user",
        Unrestricted => "unrestricted",
    }
}

/// One `module.action` allow-pattern. `*` matches a whole segment; a
/// trailing `*` inside a segment matches any suffix (`read_*`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRule {
    pub module: String,
    pub action: String,
}

impl AllowRule {
    pub fn new(module: impl Into<String>, action: impl Into<String>) -> Self {
        Self { module: module.into(), action: action.into() }
    }

    fn segment_matches(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix('*') {
            return value.starts_with(prefix);
        }
        pattern == value
    }

    pub fn matches(&self, module: &str, action: &str) -> bool {
        Self::segment_matches(&self.module, module) && Self::segment_matches(&self.action, action)
    }
}

/// Param keys treated as filesystem paths for the sandbox check.
const PATH_PARAM_KEYS: &[&str] =
    &["path", "file", "source", "dest", "destination", "dir", "directory", "cwd", "target"];

/// A permission guard refusal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionDenied {
    #[error("profile {profile} does not allow {module}.{action}")]
    ActionNotAllowed { profile: Profile, module: String, action: String },
    #[error("path {path:?} escapes the sandbox")]
    PathOutsideSandbox { path: PathBuf },
}

/// Effective permission policy for a daemon instance.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pub profile: Profile,
    rules: Vec<AllowRule>,
    sandbox_roots: Vec<PathBuf>,
}

impl PermissionPolicy {
    /// Built-in rule set for a profile.
    ///
    /// `sandbox_roots` bounds filesystem-path params for every profile
    /// except `Unrestricted`; an empty list means no path restriction.
    pub fn for_profile(profile: Profile, sandbox_roots: Vec<PathBuf>) -> Self {
        let rules = match profile {
            Profile::Readonly => vec![
                AllowRule::new("*", "read_*"),
                AllowRule::new("*", "list_*"),
                AllowRule::new("*", "get_*"),
                AllowRule::new("*", "query_*"),
            ],
            Profile::LocalWorker => vec![
                AllowRule::new("*", "read_*"),
                AllowRule::new("*", "list_*"),
                AllowRule::new("*", "get_*"),
                AllowRule::new("*", "query_*"),
                AllowRule::new("filesystem", "*"),
                AllowRule::new("shell", "run"),
            ],
            Profile::PowerUser | Profile::Unrestricted => vec![AllowRule::new("*", "*")],
        };
        let sandbox_roots =
            if profile == Profile::Unrestricted { Vec::new() } else { sandbox_roots };
        Self { profile, rules, sandbox_roots }
    }

    /// Replace the built-in rules (used by tests and custom deployments).
    pub fn with_rules(mut self, rules: Vec<AllowRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Plan-level gate: every action must be allowable on its face.
    ///
    /// Path params are not inspected here (templates are still unresolved),
    /// so this pass can only refuse on `(module, action)` capability.
    pub fn check_plan(&self, plan: &Plan) -> Result<(), PermissionDenied> {
        for action in &plan.actions {
            self.check_capability(&action.module, &action.action)?;
        }
        Ok(())
    }

    /// Per-action gate, re-run against resolved params.
    pub fn check_action(
        &self,
        module: &str,
        action: &str,
        resolved_params: &Value,
    ) -> Result<(), PermissionDenied> {
        self.check_capability(module, action)?;
        self.check_paths(resolved_params)?;
        Ok(())
    }

    fn check_capability(&self, module: &str, action: &str) -> Result<(), PermissionDenied> {
        if self.rules.iter().any(|r| r.matches(module, action)) {
            return Ok(());
        }
        Err(PermissionDenied::ActionNotAllowed {
            profile: self.profile,
            module: module.to_string(),
            action: action.to_string(),
        })
    }

    fn check_paths(&self, params: &Value) -> Result<(), PermissionDenied> {
        if self.sandbox_roots.is_empty() {
            return Ok(());
        }
        if let Value::Object(map) = params {
            for (key, value) in map {
                if let (true, Value::String(raw)) =
                    (PATH_PARAM_KEYS.contains(&key.as_str()), value)
                {
                    let real = resolve_real_path(Path::new(raw));
                    let inside =
                        self.sandbox_roots.iter().any(|root| real.starts_with(root));
                    if !inside {
                        return Err(PermissionDenied::PathOutsideSandbox { path: real });
                    }
                }
                // Nested objects can carry paths too (e.g. batch params).
                if value.is_object() || value.is_array() {
                    self.check_paths(value)?;
                }
            }
        }
        if let Value::Array(items) = params {
            for item in items {
                self.check_paths(item)?;
            }
        }
        Ok(())
    }
}

/// Resolve a path to its real form, following symlinks.
///
/// The comparison must happen on fully-resolved paths or a symlink inside
/// the sandbox could point anywhere. For paths that do not exist yet, the
/// deepest existing ancestor is canonicalised and the remainder re-appended
/// after stripping `.`/`..` components lexically.
pub fn resolve_real_path(path: &Path) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }

    let mut ancestor = path;
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    while let Some(parent) = ancestor.parent() {
        if let Some(name) = ancestor.file_name() {
            remainder.push(name.to_os_string());
        }
        ancestor = parent;
        if let Ok(real) = std::fs::canonicalize(ancestor) {
            let mut out = real;
            for part in remainder.iter().rev() {
                out.push(part);
            }
            return normalise_lexically(&out);
        }
    }
    normalise_lexically(path)
}

fn normalise_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
#[path = "permission_tests.rs"]
mod tests;
