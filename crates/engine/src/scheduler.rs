// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wave construction over the action DAG.
//!
//! A wave is the maximal set of Pending actions whose predecessors have all
//! settled in its favour: Completed, or terminal under a `continue` failure
//! policy. Ties inside a wave keep the plan's declaration order.

use iml_core::{ActionState, ExecutionState, FailurePolicy, Plan};
use std::collections::HashMap;

/// Topological order by Kahn's algorithm, declaration order as tiebreak.
///
/// The validator guarantees acyclicity before anything reaches here, so
/// every action appears exactly once.
pub fn topo_order(plan: &Plan) -> Vec<String> {
    let mut indegree: HashMap<&str, usize> =
        plan.actions.iter().map(|a| (a.id.as_str(), a.depends_on.len())).collect();
    let dependents = plan.dependents();

    let mut order = Vec::with_capacity(plan.actions.len());
    let mut frontier: Vec<&str> = plan
        .actions
        .iter()
        .filter(|a| a.depends_on.is_empty())
        .map(|a| a.id.as_str())
        .collect();

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for id in frontier {
            order.push(id.to_string());
            for &dependent in dependents.get(id).into_iter().flatten() {
                if let Some(remaining) = indegree.get_mut(dependent) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        // Keep declaration order within the new frontier.
        next.sort_by_key(|id| plan.actions.iter().position(|a| a.id == *id));
        frontier = next;
    }

    order
}

/// Whether a dependency's terminal state unblocks its dependents.
fn satisfied(plan: &Plan, dep_id: &str, state: &ExecutionState) -> bool {
    let record = match state.action(dep_id) {
        Some(r) => r,
        None => return false,
    };
    match record.state {
        ActionState::Completed => true,
        ActionState::Failed | ActionState::Skipped => plan
            .action(dep_id)
            .is_some_and(|a| a.on_failure == FailurePolicy::Continue),
        _ => false,
    }
}

/// The next wave: every Pending action whose dependencies are satisfied,
/// in declaration order.
pub fn ready_wave(plan: &Plan, state: &ExecutionState) -> Vec<String> {
    plan.actions
        .iter()
        .filter(|action| {
            state.action(&action.id).is_some_and(|r| r.state == ActionState::Pending)
                && action.depends_on.iter().all(|dep| satisfied(plan, dep, state))
        })
        .map(|action| action.id.clone())
        .collect()
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
