// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unix-socket listener: framed requests in, typed responses out.

use crate::lifecycle::DaemonState;
use iml_core::{PlanId, SessionContext};
use iml_engine::{ApprovalDecision, SubmitError};
use iml_triggers::{TriggerDefinition, TriggerError, TriggerId};
use iml_wire::{read_message, write_message, DaemonStatus, Request, Response};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

/// Accept loop; one task per connection.
pub async fn run_listener(
    listener: UnixListener,
    daemon: Arc<DaemonState>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let daemon = Arc::clone(&daemon);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, daemon, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    daemon: Arc<DaemonState>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = read_message::<Request, _>(&mut stream) => request,
        };
        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "malformed request; closing connection");
                let _ = write_message(&mut stream, &Response::error("protocol_error", e.to_string()))
                    .await;
                break;
            }
        };

        if request == Request::Shutdown {
            let _ = write_message(&mut stream, &Response::Ok).await;
            shutdown.cancel();
            break;
        }

        let response = dispatch(&daemon, request).await;
        if let Err(e) = write_message(&mut stream, &response).await {
            tracing::warn!(error = %e, "response write failed");
            break;
        }
    }
}

/// Route one request to the owning component.
pub async fn dispatch(daemon: &DaemonState, request: Request) -> Response {
    match request {
        Request::SubmitPlan { plan } => submit_plan(daemon, plan).await,
        Request::GetPlan { plan_id } => {
            match daemon.executor.status(&PlanId::from_string(&plan_id)) {
                Ok(Some(state)) => Response::Plan { state },
                Ok(None) => Response::error("not_found", format!("no plan {plan_id}")),
                Err(e) => Response::error("storage_error", e.to_string()),
            }
        }
        Request::CancelPlan { plan_id } => {
            if daemon.executor.cancel(&PlanId::from_string(&plan_id)) {
                Response::Ok
            } else {
                Response::error("not_found", format!("plan {plan_id} is not running"))
            }
        }
        Request::Approve { plan_id, action_id, decision } => {
            approve(daemon, &plan_id, &action_id, decision)
        }
        Request::ListApprovals => {
            let approvals = daemon
                .executor
                .approvals()
                .pending()
                .iter()
                .filter_map(|a| serde_json::to_value(a).ok())
                .collect();
            Response::Approvals { approvals }
        }
        Request::SubmitGroup { plans, max_concurrent } => {
            submit_group(daemon, plans, max_concurrent).await
        }
        Request::ListPlans { limit } => match daemon.executor.store().list_recent(limit) {
            Ok(states) => Response::Plans { states },
            Err(e) => Response::error("storage_error", e.to_string()),
        },
        Request::ListModules => {
            let manifests = daemon
                .executor
                .registry()
                .manifests()
                .into_iter()
                .filter_map(|m| serde_json::to_value(m).ok())
                .collect();
            Response::Modules { manifests }
        }
        Request::GetModule { module_id } => {
            match daemon.executor.registry().manifest(&module_id) {
                Some(manifest) => Response::Modules {
                    manifests: serde_json::to_value(manifest).map(|v| vec![v]).unwrap_or_default(),
                },
                None => Response::error("not_found", format!("no module {module_id}")),
            }
        }
        Request::GetActionSchema { module_id, action } => {
            match daemon.executor.registry().action_schema(&module_id, &action) {
                Some(decl) => match serde_json::to_value(decl) {
                    Ok(schema) => Response::ActionSchema { schema },
                    Err(e) => Response::error("internal", e.to_string()),
                },
                None => {
                    Response::error("not_found", format!("no action {module_id}.{action}"))
                }
            }
        }
        Request::RecentEvents { pattern, limit } => recent_events(daemon, pattern, limit),
        Request::GetContext => Response::Context { prompt: compose_context(daemon) },
        Request::ListTriggers => with_triggers(daemon, |triggers| {
            let listed = triggers
                .list()
                .map_err(trigger_error)?
                .iter()
                .filter_map(|d| serde_json::to_value(d).ok())
                .collect();
            Ok(Response::Triggers { triggers: listed })
        }),
        Request::GetTrigger { trigger_id } => with_triggers(daemon, |triggers| {
            match triggers.get(&TriggerId::from_string(&trigger_id)).map_err(trigger_error)? {
                Some(def) => Ok(Response::Trigger {
                    definition: serde_json::to_value(&def).unwrap_or(Value::Null),
                }),
                None => Ok(Response::error("not_found", format!("no trigger {trigger_id}"))),
            }
        }),
        Request::RegisterTrigger { definition } => with_triggers(daemon, |triggers| {
            let def: TriggerDefinition = serde_json::from_value(definition)
                .map_err(|e| Response::error("schema_error", e.to_string()))?;
            let id = triggers
                .register(def, &SessionContext::default())
                .map_err(trigger_error)?;
            Ok(Response::Trigger { definition: serde_json::json!({"trigger_id": id}) })
        }),
        Request::DeleteTrigger { trigger_id } => with_triggers(daemon, |triggers| {
            if triggers.delete(&TriggerId::from_string(&trigger_id)).map_err(trigger_error)? {
                Ok(Response::Ok)
            } else {
                Ok(Response::error("not_found", format!("no trigger {trigger_id}")))
            }
        }),
        Request::ActivateTrigger { trigger_id } => with_triggers(daemon, |triggers| {
            triggers
                .activate(&TriggerId::from_string(&trigger_id))
                .map_err(trigger_error)?;
            Ok(Response::Ok)
        }),
        Request::DeactivateTrigger { trigger_id } => with_triggers(daemon, |triggers| {
            triggers
                .deactivate(&TriggerId::from_string(&trigger_id))
                .map_err(trigger_error)?;
            Ok(Response::Ok)
        }),
        Request::Status => Response::Status {
            status: DaemonStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_ms: daemon.start_time.elapsed().as_millis() as u64,
                triggers_enabled: daemon.triggers.is_some(),
                modules: daemon
                    .executor
                    .registry()
                    .manifests()
                    .iter()
                    .map(|m| m.module_id.clone())
                    .collect(),
            },
        },
        // Handled by the connection loop.
        Request::Shutdown => Response::Ok,
    }
}

async fn submit_plan(daemon: &DaemonState, plan: Value) -> Response {
    let plan = match iml_plan::parse_plan(plan) {
        Ok(plan) => plan,
        Err(e) => return Response::error("schema_error", e.to_string()),
    };
    let ctx = SessionContext {
        session_id: plan.session_id,
        correlation_id: plan.correlation_id.clone(),
        trigger_id: None,
        trigger_chain_depth: 0,
    };
    match daemon.executor.submit(plan, ctx).await {
        Ok(state) => Response::Plan { state },
        Err(SubmitError::Validation(e)) => {
            let hints = e.violations.iter().map(|v| v.to_string()).collect();
            Response::error_with_hints("validation_error", e.to_string(), hints)
        }
        Err(e) => Response::error("internal", e.to_string()),
    }
}

async fn submit_group(daemon: &DaemonState, plans: Vec<Value>, max_concurrent: usize) -> Response {
    let mut parsed = Vec::with_capacity(plans.len());
    for plan in plans {
        match iml_plan::parse_plan(plan) {
            Ok(plan) => parsed.push(plan),
            Err(e) => return Response::error("schema_error", e.to_string()),
        }
    }
    let result = daemon.group.run(parsed, max_concurrent, SessionContext::default()).await;
    match serde_json::to_value(&result) {
        Ok(result) => Response::Group { result },
        Err(e) => Response::error("internal", e.to_string()),
    }
}

fn approve(daemon: &DaemonState, plan_id: &str, action_id: &str, decision: Value) -> Response {
    let decision: ApprovalDecision = match serde_json::from_value(decision) {
        Ok(decision) => decision,
        Err(e) => return Response::error("schema_error", e.to_string()),
    };
    match daemon.executor.approvals().resolve(
        PlanId::from_string(plan_id),
        action_id,
        decision,
    ) {
        Ok(()) => Response::Ok,
        Err(e) => Response::error("not_found", e.to_string()),
    }
}

fn recent_events(daemon: &DaemonState, pattern: Option<String>, limit: usize) -> Response {
    use iml_core::{EventBus, TopicPattern};
    let events = daemon.bus.recent(limit.max(1));
    let events = match pattern.as_deref() {
        Some(pattern) => match TopicPattern::compile(pattern) {
            Ok(compiled) => {
                events.into_iter().filter(|e| compiled.matches(&e.topic)).collect()
            }
            Err(e) => return Response::error("schema_error", e.to_string()),
        },
        None => events,
    };
    Response::Events { events }
}

/// Render the capability manifest into the prompt the model plans against.
fn compose_context(daemon: &DaemonState) -> String {
    let mut prompt = String::from(
        "You drive this machine by submitting IML v2 plans: JSON documents \
         with a `plan_id` (UUID), `protocol_version` \"2.0\", and an \
         `actions` array forming a DAG via `depends_on`. Use \
         {{result.<action_id>.<path>}} to reference a completed \
         predecessor's output.\n\nAvailable modules:\n",
    );
    for manifest in daemon.executor.registry().manifests() {
        prompt.push_str(&format!("\n## {} (v{})\n", manifest.module_id, manifest.version));
        for action in &manifest.actions {
            let params: Vec<String> = action
                .params
                .iter()
                .map(|p| {
                    format!(
                        "{}{}: {:?}",
                        p.name,
                        if p.required { "" } else { "?" },
                        p.kind
                    )
                })
                .collect();
            prompt.push_str(&format!(
                "- {}({}): {}\n",
                action.name,
                params.join(", "),
                action.description,
            ));
        }
    }
    prompt
}

fn trigger_error(e: TriggerError) -> Response {
    let kind = match &e {
        TriggerError::NotFound(_) => "not_found",
        TriggerError::ChainDepthExceeded { .. } => "chain_depth_exceeded",
        TriggerError::InvalidDefinition(_) => "schema_error",
        TriggerError::Storage(_) => "storage_error",
    };
    Response::error(kind, e.to_string())
}

/// Trigger requests answer with a service-unavailable error when the
/// trigger daemon is disabled by config.
fn with_triggers(
    daemon: &DaemonState,
    f: impl FnOnce(&Arc<iml_triggers::TriggerDaemon>) -> Result<Response, Response>,
) -> Response {
    match &daemon.triggers {
        Some(triggers) => f(triggers).unwrap_or_else(|e| e),
        None => Response::error("triggers_disabled", "trigger daemon is disabled"),
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
