// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structural validation of parsed plans.
//!
//! Every violation is collected before returning, so the model gets one
//! complete diagnosis instead of a fix-resubmit loop per defect.

use crate::template::TEMPLATE_PATTERN;
use iml_core::{Plan, PlanMode, REQUIRED_COMPILER_PHASES};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A single structural defect in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    UnknownDependency { action: String, dependency: String },
    /// Cycle through `depends_on`, as the traversal path ending where it
    /// started (e.g. `[a1, a2, a1]`).
    DependencyCycle { path: Vec<String> },
    /// `{{result.X...}}` names an action that is not a transitive dependency.
    TemplateOutsideDependencies { action: String, referenced: String },
    MalformedTemplate { action: String, expr: String },
    MissingCompilerTrace,
    CompilerPhaseMissing { phase: String },
    CompilerPhaseEmpty { phase: String },
    RollbackInvalid { action: String, reason: String },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::UnknownDependency { action, dependency } => {
                write!(f, "action {action:?} depends on unknown action {dependency:?}")
            }
            Violation::DependencyCycle { path } => {
                write!(f, "dependency cycle: [{}]", path.join(" → "))
            }
            Violation::TemplateOutsideDependencies { action, referenced } => write!(
                f,
                "action {action:?} references {{{{result.{referenced}...}}}} but does not depend on {referenced:?}"
            ),
            Violation::MalformedTemplate { action, expr } => {
                write!(f, "action {action:?} has malformed template {expr:?}")
            }
            Violation::MissingCompilerTrace => {
                write!(f, "compiled plan is missing its compiler_trace")
            }
            Violation::CompilerPhaseMissing { phase } => {
                write!(f, "compiler_trace is missing phase {phase:?}")
            }
            Violation::CompilerPhaseEmpty { phase } => {
                write!(f, "compiler_trace phase {phase:?} is empty")
            }
            Violation::RollbackInvalid { action, reason } => {
                write!(f, "action {action:?} has an invalid rollback body: {reason}")
            }
        }
    }
}

/// All structural violations found in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plan failed validation with {} violation(s): ", self.violations.len())?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Validate the structural invariants of a parsed plan.
pub fn validate(plan: &Plan) -> Result<(), ValidationError> {
    let mut violations = Vec::new();

    let ids: HashSet<&str> = plan.actions.iter().map(|a| a.id.as_str()).collect();

    // Unresolved dependencies
    for action in &plan.actions {
        for dep in &action.depends_on {
            if !ids.contains(dep.as_str()) {
                violations.push(Violation::UnknownDependency {
                    action: action.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Cycles (only meaningful once every edge resolves)
    if violations.is_empty() {
        if let Some(path) = find_cycle(plan) {
            violations.push(Violation::DependencyCycle { path });
        }
    }

    // Template references
    for action in &plan.actions {
        let deps: HashSet<String> =
            plan.transitive_dependencies(&action.id).into_iter().collect();
        check_templates(&action.id, &action.params, &deps, &mut violations);
    }

    // Compiled plans must carry evidence of all four phases
    if plan.plan_mode == PlanMode::Compiled {
        match &plan.compiler_trace {
            None => violations.push(Violation::MissingCompilerTrace),
            Some(trace) if trace.phases.is_empty() => {
                violations.push(Violation::MissingCompilerTrace)
            }
            Some(trace) => {
                for phase in REQUIRED_COMPILER_PHASES {
                    match trace.phase(phase) {
                        None => violations
                            .push(Violation::CompilerPhaseMissing { phase: phase.to_string() }),
                        Some(p) if p.detail.is_empty() => violations
                            .push(Violation::CompilerPhaseEmpty { phase: phase.to_string() }),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    // Rollback bodies are actions structurally, but live outside the DAG
    for action in &plan.actions {
        if let Some(rollback) = &action.rollback {
            if rollback.module.is_empty() || rollback.action.is_empty() {
                violations.push(Violation::RollbackInvalid {
                    action: action.id.clone(),
                    reason: "module and action must be non-empty".to_string(),
                });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Depth-first cycle search with gray/black marking.
///
/// Returns the cycle as a path ending at its starting node, following
/// `depends_on` edges in declaration order for determinism.
fn find_cycle(plan: &Plan) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> =
        plan.actions.iter().map(|a| (a.id.as_str(), Mark::White)).collect();

    for action in &plan.actions {
        if marks.get(action.id.as_str()) == Some(&Mark::White) {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(plan, &action.id, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    plan: &'a Plan,
    id: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    marks.insert(id, Mark::Gray);
    stack.push(id);

    if let Some(action) = plan.action(id) {
        for dep in &action.depends_on {
            match marks.get(dep.as_str()) {
                Some(Mark::Gray) => {
                    // Back-edge: slice the stack from the first occurrence
                    // of `dep` and close the loop.
                    let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(dep.clone());
                    return Some(path);
                }
                Some(Mark::White) => {
                    if let Some(cycle) = visit(plan, dep, marks, stack) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }
    }

    stack.pop();
    marks.insert(id, Mark::Black);
    None
}

/// Recursively scan a params document for template expressions.
fn check_templates(
    action_id: &str,
    value: &Value,
    deps: &HashSet<String>,
    violations: &mut Vec<Violation>,
) {
    match value {
        Value::String(s) => {
            for caps in TEMPLATE_PATTERN.captures_iter(s) {
                let sigil = &caps[1];
                let body = &caps[2];
                match sigil {
                    "result" => {
                        let referenced = body.split('.').next().unwrap_or(body);
                        if referenced.is_empty() {
                            violations.push(Violation::MalformedTemplate {
                                action: action_id.to_string(),
                                expr: caps[0].to_string(),
                            });
                        } else if !deps.contains(referenced) {
                            violations.push(Violation::TemplateOutsideDependencies {
                                action: action_id.to_string(),
                                referenced: referenced.to_string(),
                            });
                        }
                    }
                    // Syntax is enforced by the pattern itself; an empty body
                    // never matches.
                    "memory" | "env" => {}
                    _ => {}
                }
            }
            // Catch sigil-like text the strict pattern refused
            if s.contains("{{") && !TEMPLATE_PATTERN.is_match(s) {
                violations.push(Violation::MalformedTemplate {
                    action: action_id.to_string(),
                    expr: s.clone(),
                });
            }
        }
        Value::Array(items) => {
            for item in items {
                check_templates(action_id, item, deps, violations);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                check_templates(action_id, item, deps, violations);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
