// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::plan::{Action, Plan};
use yare::parameterized;

fn two_action_state() -> ExecutionState {
    let plan = Plan::builder()
        .actions(vec![
            Action::builder().id("a1").build(),
            Action::builder().id("a2").depends_on(vec!["a1".to_string()]).build(),
        ])
        .build();
    ExecutionState::new(&plan, 1_000)
}

#[test]
fn new_state_seeds_pending_records_in_order() {
    let state = two_action_state();
    assert_eq!(state.status, PlanStatus::Queued);
    let ids: Vec<&String> = state.actions.keys().collect();
    assert_eq!(ids, vec!["a1", "a2"]);
    assert!(state.actions.values().all(|r| r.state == ActionState::Pending));
}

#[parameterized(
    pending_to_waiting = { ActionState::Pending, ActionState::Waiting, true },
    pending_to_skipped = { ActionState::Pending, ActionState::Skipped, true },
    waiting_to_running = { ActionState::Waiting, ActionState::Running, true },
    waiting_to_failed = { ActionState::Waiting, ActionState::Failed, true },
    running_to_completed = { ActionState::Running, ActionState::Completed, true },
    running_to_failed = { ActionState::Running, ActionState::Failed, true },
    completed_to_rolled_back = { ActionState::Completed, ActionState::RolledBack, true },
    pending_to_running = { ActionState::Pending, ActionState::Running, false },
    completed_to_running = { ActionState::Completed, ActionState::Running, false },
    failed_to_completed = { ActionState::Failed, ActionState::Completed, false },
    skipped_to_waiting = { ActionState::Skipped, ActionState::Waiting, false },
    rolled_back_to_anything = { ActionState::RolledBack, ActionState::Pending, false },
)]
fn transition_rules(from: ActionState, to: ActionState, allowed: bool) {
    assert_eq!(from.can_transition_to(to), allowed);
}

#[test]
fn transition_stamps_timestamps() {
    let mut state = two_action_state();
    state.transition("a1", ActionState::Waiting, 10).unwrap();
    state.transition("a1", ActionState::Running, 20).unwrap();
    state.transition("a1", ActionState::Completed, 30).unwrap();

    let record = state.action("a1").unwrap();
    assert_eq!(record.started_at_ms, Some(20));
    assert_eq!(record.ended_at_ms, Some(30));
}

#[test]
fn illegal_transition_is_rejected() {
    let mut state = two_action_state();
    let err = state.transition("a1", ActionState::Running, 10).unwrap_err();
    assert_eq!(
        err,
        StateError::InvalidTransition {
            action: "a1".to_string(),
            from: ActionState::Pending,
            to: ActionState::Running,
        }
    );
}

#[test]
fn unknown_action_is_rejected() {
    let mut state = two_action_state();
    let err = state.transition("nope", ActionState::Waiting, 10).unwrap_err();
    assert_eq!(err, StateError::UnknownAction("nope".to_string()));
}

#[test]
fn terminal_states_never_transition_again() {
    let mut state = two_action_state();
    state.transition("a1", ActionState::Waiting, 1).unwrap();
    state.transition("a1", ActionState::Running, 2).unwrap();
    state.transition("a1", ActionState::Failed, 3).unwrap();
    assert!(state.transition("a1", ActionState::Running, 4).is_err());
    assert!(state.transition("a1", ActionState::Completed, 4).is_err());
}

#[test]
fn settled_and_outcome() {
    let mut state = two_action_state();
    assert!(!state.is_settled());

    state.transition("a1", ActionState::Waiting, 1).unwrap();
    state.transition("a1", ActionState::Running, 2).unwrap();
    state.transition("a1", ActionState::Completed, 3).unwrap();
    state.transition("a2", ActionState::Waiting, 4).unwrap();
    state.transition("a2", ActionState::Running, 5).unwrap();
    state.transition("a2", ActionState::Completed, 6).unwrap();

    assert!(state.is_settled());
    assert_eq!(state.derive_outcome(), PlanStatus::Succeeded);
}

#[test]
fn skipped_action_fails_the_plan() {
    let mut state = two_action_state();
    state.transition("a1", ActionState::Waiting, 1).unwrap();
    state.transition("a1", ActionState::Running, 2).unwrap();
    state.transition("a1", ActionState::Failed, 3).unwrap();
    state.transition("a2", ActionState::Skipped, 3).unwrap();

    assert!(state.is_settled());
    assert_eq!(state.derive_outcome(), PlanStatus::Failed);
}

#[test]
fn rejection_round_trips_through_json() {
    let mut state = two_action_state();
    state.reject(
        RejectionDetails {
            source: RejectionSource::ScannerPipeline,
            verdict: "reject".to_string(),
            risk_score: 0.9,
            threat_types: vec!["prompt_injection".to_string()],
            scanner_findings: vec![serde_json::json!({"scanner": "heuristic"})],
            recommendations: vec!["remove the override phrase".to_string()],
            clarification_needed: false,
        },
        99,
    );

    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["rejection_details"]["source"], "scanner_pipeline");

    let back: ExecutionState = serde_json::from_value(json).unwrap();
    assert_eq!(back, state);
}

#[test]
fn status_display_matches_wire_strings() {
    assert_eq!(PlanStatus::Succeeded.to_string(), "succeeded");
    assert_eq!(ActionState::RolledBack.to_string(), "rolled_back");
    assert_eq!(RejectionSource::RateLimiter.to_string(), "rate_limiter");
}
