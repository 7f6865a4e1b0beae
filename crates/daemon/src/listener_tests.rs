// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::lifecycle::startup;
use crate::Config;
use iml_wire::{Request, Response};
use serde_json::json;

async fn test_daemon(dir: &std::path::Path) -> DaemonState {
    let mut config = Config::default();
    config.state_dir = Some(dir.to_path_buf());
    config.security.profile = "unrestricted".to_string();
    startup(config).await.unwrap()
}

fn plan_json(actions: serde_json::Value) -> serde_json::Value {
    json!({
        "plan_id": uuid_like(),
        "protocol_version": "2.0",
        "description": "listener test plan",
        "plan_mode": "direct",
        "actions": actions,
    })
}

fn uuid_like() -> String {
    iml_core::PlanId::new().to_string()
}

#[tokio::test]
async fn status_reports_modules_and_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;

    match dispatch(&daemon, Request::Status).await {
        Response::Status { status } => {
            assert!(status.triggers_enabled);
            assert_eq!(status.modules, vec!["filesystem", "shell"]);
        }
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn submit_plan_round_trips_through_the_executor() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;
    let file = dir.path().join("hello.txt");
    std::fs::write(&file, "hi").unwrap();

    let plan = plan_json(json!([
        {"id": "a1", "module": "filesystem", "action": "read_file",
         "params": {"path": file}}
    ]));
    let plan_id = plan["plan_id"].as_str().unwrap().to_string();

    match dispatch(&daemon, Request::SubmitPlan { plan }).await {
        Response::Plan { state } => {
            assert_eq!(state.status, iml_core::PlanStatus::Succeeded);
            assert_eq!(
                state.action("a1").unwrap().result.as_ref().unwrap()["output"],
                "hi"
            );
        }
        other => panic!("unexpected response {other:?}"),
    }

    // And the state is queryable afterwards.
    match dispatch(&daemon, Request::GetPlan { plan_id }).await {
        Response::Plan { state } => assert_eq!(state.status, iml_core::PlanStatus::Succeeded),
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn invalid_plan_json_is_a_schema_error() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;

    match dispatch(&daemon, Request::SubmitPlan { plan: json!([1, 2, 3]) }).await {
        Response::Error { kind, .. } => assert_eq!(kind, "schema_error"),
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn cyclic_plan_reports_validation_error_with_hints() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;

    let plan = plan_json(json!([
        {"id": "a1", "module": "filesystem", "action": "read_file", "depends_on": ["a2"]},
        {"id": "a2", "module": "filesystem", "action": "read_file", "depends_on": ["a1"]},
    ]));
    match dispatch(&daemon, Request::SubmitPlan { plan }).await {
        Response::Error { kind, recommendations, .. } => {
            assert_eq!(kind, "validation_error");
            assert!(recommendations.iter().any(|r| r.contains("cycle")));
        }
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn unknown_plan_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;
    match dispatch(&daemon, Request::GetPlan { plan_id: uuid_like() }).await {
        Response::Error { kind, .. } => assert_eq!(kind, "not_found"),
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn module_manifest_queries() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;

    match dispatch(&daemon, Request::ListModules).await {
        Response::Modules { manifests } => assert_eq!(manifests.len(), 2),
        other => panic!("unexpected response {other:?}"),
    }
    match dispatch(
        &daemon,
        Request::GetActionSchema {
            module_id: "filesystem".to_string(),
            action: "read_file".to_string(),
        },
    )
    .await
    {
        Response::ActionSchema { schema } => {
            assert_eq!(schema["permission_class"], "read");
        }
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn context_prompt_names_every_module_action() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;

    match dispatch(&daemon, Request::GetContext).await {
        Response::Context { prompt } => {
            assert!(prompt.contains("IML v2"));
            assert!(prompt.contains("## filesystem"));
            assert!(prompt.contains("read_file"));
            assert!(prompt.contains("## shell"));
        }
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn trigger_crud_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;

    let definition = json!({
        "trigger_id": "trg-wire-test",
        "name": "wire test",
        "enabled": false,
        "condition": {"kind": "temporal", "schedule": {"interval": {"seconds": 3600}}},
        "plan_template": {"actions": []},
    });
    let id = match dispatch(&daemon, Request::RegisterTrigger { definition }).await {
        Response::Trigger { definition } => definition["trigger_id"].as_str().unwrap().to_string(),
        other => panic!("unexpected response {other:?}"),
    };

    match dispatch(&daemon, Request::ListTriggers).await {
        Response::Triggers { triggers } => assert_eq!(triggers.len(), 1),
        other => panic!("unexpected response {other:?}"),
    }
    match dispatch(&daemon, Request::GetTrigger { trigger_id: id.clone() }).await {
        Response::Trigger { definition } => assert_eq!(definition["name"], "wire test"),
        other => panic!("unexpected response {other:?}"),
    }
    match dispatch(&daemon, Request::ActivateTrigger { trigger_id: id.clone() }).await {
        Response::Ok => {}
        other => panic!("unexpected response {other:?}"),
    }
    match dispatch(&daemon, Request::DeleteTrigger { trigger_id: id.clone() }).await {
        Response::Ok => {}
        other => panic!("unexpected response {other:?}"),
    }
    match dispatch(&daemon, Request::GetTrigger { trigger_id: id }).await {
        Response::Error { kind, .. } => assert_eq!(kind, "not_found"),
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn trigger_requests_fail_cleanly_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.state_dir = Some(dir.path().to_path_buf());
    config.triggers.enabled = false;
    let daemon = startup(config).await.unwrap();

    match dispatch(&daemon, Request::ListTriggers).await {
        Response::Error { kind, .. } => assert_eq!(kind, "triggers_disabled"),
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn recent_events_filter_by_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;
    let file = dir.path().join("x.txt");
    std::fs::write(&file, "x").unwrap();

    let plan = plan_json(json!([
        {"id": "a1", "module": "filesystem", "action": "read_file", "params": {"path": file}}
    ]));
    dispatch(&daemon, Request::SubmitPlan { plan }).await;

    match dispatch(
        &daemon,
        Request::RecentEvents { pattern: Some("plan.*.succeeded".to_string()), limit: 50 },
    )
    .await
    {
        Response::Events { events } => {
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].kind, "plan.succeeded");
        }
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}

#[tokio::test]
async fn group_submission_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = test_daemon(dir.path()).await;
    let file = dir.path().join("g.txt");
    std::fs::write(&file, "g").unwrap();

    let make = || {
        plan_json(json!([
            {"id": "a1", "module": "filesystem", "action": "read_file", "params": {"path": file}}
        ]))
    };
    match dispatch(&daemon, Request::SubmitGroup { plans: vec![make(), make()], max_concurrent: 2 })
        .await
    {
        Response::Group { result } => {
            assert_eq!(result["status"], "all_succeeded");
            assert_eq!(result["outcomes"].as_array().unwrap().len(), 2);
        }
        other => panic!("unexpected response {other:?}"),
    }
    daemon.shutdown().await;
}
