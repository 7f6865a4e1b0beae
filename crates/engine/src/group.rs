// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out execution of plan groups.

use crate::executor::PlanExecutor;
use futures_util::future::join_all;
use iml_core::{Clock, ExecutionState, Plan, PlanId, PlanStatus, SessionContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Aggregate outcome of one group submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    AllSucceeded,
    Partial,
    AllFailed,
}

iml_core::simple_display! {
    GroupStatus {
        AllSucceeded => "all_succeeded",
        Partial => "partial",
        AllFailed => "all_failed",
    }
}

/// Per-plan slot in the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub plan_id: PlanId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ExecutionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResult {
    pub status: GroupStatus,
    pub outcomes: Vec<PlanOutcome>,
    pub duration_ms: u64,
}

/// Runs N plans with a shared concurrency ceiling.
///
/// The group semaphore bounds how many member plans hold an executor slot
/// at once; per-module ceilings inside the executor apply on top of it.
pub struct PlanGroupExecutor<C: Clock> {
    executor: Arc<PlanExecutor<C>>,
    clock: C,
}

impl<C: Clock> PlanGroupExecutor<C> {
    pub fn new(executor: Arc<PlanExecutor<C>>, clock: C) -> Self {
        Self { executor, clock }
    }

    pub async fn run(
        &self,
        plans: Vec<Plan>,
        max_concurrent: usize,
        ctx: SessionContext,
    ) -> GroupResult {
        let started = self.clock.now();
        let gate = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let futures = plans.into_iter().map(|plan| {
            let gate = Arc::clone(&gate);
            let executor = Arc::clone(&self.executor);
            let ctx = ctx.clone();
            async move {
                let plan_id = plan.plan_id;
                let _slot = match gate.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return PlanOutcome {
                            plan_id,
                            state: None,
                            error: Some("group gate closed".to_string()),
                        }
                    }
                };
                match executor.submit(plan, ctx).await {
                    Ok(state) => PlanOutcome { plan_id, state: Some(state), error: None },
                    Err(e) => PlanOutcome { plan_id, state: None, error: Some(e.to_string()) },
                }
            }
        });

        let outcomes = join_all(futures).await;
        let succeeded = outcomes
            .iter()
            .filter(|o| o.state.as_ref().is_some_and(|s| s.status == PlanStatus::Succeeded))
            .count();
        let status = if succeeded == outcomes.len() && !outcomes.is_empty() {
            GroupStatus::AllSucceeded
        } else if succeeded == 0 {
            GroupStatus::AllFailed
        } else {
            GroupStatus::Partial
        };

        GroupResult {
            status,
            outcomes,
            duration_ms: (self.clock.now() - started).as_millis() as u64,
        }
    }
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
