// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bridge between the trigger daemon and the plan executor.

use async_trait::async_trait;
use iml_core::{PlanId, PlanStatus, SessionContext};
use iml_engine::PlanExecutor;
use iml_triggers::{LaunchResult, PlanLauncher};
use serde_json::Value;
use std::sync::Arc;

/// Launches trigger plans through the ordinary submission path.
///
/// Trigger-launched plans get no shortcut: they pass the same validation
/// and admission pipeline as plans submitted over the socket.
pub struct ExecutorLauncher {
    executor: Arc<PlanExecutor>,
}

impl ExecutorLauncher {
    pub fn new(executor: Arc<PlanExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl PlanLauncher for ExecutorLauncher {
    async fn launch(&self, plan: Value, ctx: SessionContext) -> Result<LaunchResult, String> {
        let plan = iml_plan::parse_plan(plan).map_err(|e| e.to_string())?;
        let plan_id = plan.plan_id;
        let state = self.executor.submit(plan, ctx).await.map_err(|e| e.to_string())?;
        Ok(LaunchResult { plan_id, succeeded: state.status == PlanStatus::Succeeded })
    }

    async fn cancel(&self, plan_id: &PlanId) -> bool {
        self.executor.cancel(plan_id)
    }
}
