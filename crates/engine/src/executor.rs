// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan executor: admission, wave execution, retry, cascade, rollback.

use crate::approvals::{ApprovalDecision, ApprovalQueue, ApprovalRequest};
use crate::memory::SessionMemory;
use crate::module::{ActionContext, ModuleError, ModuleRegistry};
use crate::scheduler::{ready_wave, topo_order};
use futures_util::future::join_all;
use iml_core::{
    ActionState, Clock, EventBus, ExecutionState, Plan, PlanId, PlanStatus, RejectionDetails,
    RejectionSource, SessionContext, SessionContextPropagator, StateError, SystemClock,
    UniversalEvent,
};
use iml_plan::{resolve_params, ResolveInputs, ValidationError};
use iml_security::{ActionRateLimiter, OutputSanitizer, PermissionPolicy, SecurityPipeline};
use iml_storage::{StateStore, StorageError};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Submission failures that are errors rather than rejections.
///
/// Admission refusals (scanners, permissions, rate limits) are not errors:
/// they come back as a Rejected [`ExecutionState`] carrying
/// `rejection_details` so the model can read the diagnosis.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("executor is shutting down")]
    ShuttingDown,
}

/// Executor tuning from the daemon config.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Ceiling on concurrently running plans.
    pub max_concurrent_plans: usize,
    /// Per-module ceilings on concurrently running actions.
    pub resource_limits: HashMap<String, usize>,
    /// Fail `{{memory.*}}` on missing keys instead of substituting "".
    pub strict_memory: bool,
    /// Plan submissions allowed per identity per window, when set.
    pub submit_rate: Option<(u32, u64)>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_plans: 4,
            resource_limits: HashMap::new(),
            strict_memory: false,
            submit_rate: None,
        }
    }
}

/// Collaborators the executor is wired to.
pub struct ExecutorDeps {
    pub registry: Arc<ModuleRegistry>,
    pub pipeline: SecurityPipeline,
    pub policy: PermissionPolicy,
    pub store: Arc<StateStore>,
    pub bus: Arc<dyn EventBus>,
}

/// Wave-based plan executor.
///
/// Owns each plan's [`ExecutionState`] exclusively while the plan runs;
/// every transition is persisted and mirrored onto the event bus.
pub struct PlanExecutor<C: Clock = SystemClock> {
    registry: Arc<ModuleRegistry>,
    pipeline: SecurityPipeline,
    policy: PermissionPolicy,
    sanitizer: OutputSanitizer,
    limiter: Option<ActionRateLimiter<C>>,
    store: Arc<StateStore>,
    bus: Arc<dyn EventBus>,
    approvals: Arc<ApprovalQueue>,
    propagator: Arc<SessionContextPropagator>,
    clock: C,
    global_slots: Arc<Semaphore>,
    module_slots: HashMap<String, Arc<Semaphore>>,
    running: Mutex<HashMap<PlanId, CancellationToken>>,
    strict_memory: bool,
}

impl<C: Clock> PlanExecutor<C> {
    pub fn new(deps: ExecutorDeps, config: ExecutorConfig, clock: C) -> Self {
        let module_slots = config
            .resource_limits
            .iter()
            .map(|(module, &limit)| (module.clone(), Arc::new(Semaphore::new(limit.max(1)))))
            .collect();
        let limiter = config
            .submit_rate
            .map(|(limit, window)| ActionRateLimiter::new(limit, window, clock.clone()));
        Self {
            registry: deps.registry,
            pipeline: deps.pipeline,
            policy: deps.policy,
            sanitizer: OutputSanitizer::default(),
            limiter,
            store: deps.store,
            bus: deps.bus,
            approvals: Arc::new(ApprovalQueue::new()),
            propagator: Arc::new(SessionContextPropagator::new()),
            clock,
            global_slots: Arc::new(Semaphore::new(config.max_concurrent_plans.max(1))),
            module_slots,
            running: Mutex::new(HashMap::new()),
            strict_memory: config.strict_memory,
        }
    }

    pub fn approvals(&self) -> Arc<ApprovalQueue> {
        Arc::clone(&self.approvals)
    }

    pub fn propagator(&self) -> Arc<SessionContextPropagator> {
        Arc::clone(&self.propagator)
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<ModuleRegistry> {
        Arc::clone(&self.registry)
    }

    /// Load persisted state for a plan.
    pub fn status(&self, plan_id: &PlanId) -> Result<Option<ExecutionState>, StorageError> {
        self.store.get_plan(plan_id)
    }

    /// Signal a running plan to stop. Returns false if the plan is not live.
    pub fn cancel(&self, plan_id: &PlanId) -> bool {
        self.approvals.drop_plan(plan_id);
        match self.running.lock().get(plan_id) {
            Some(token) => {
                tracing::info!(plan_id = %plan_id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Submit a plan: validate, admit, and run to completion.
    ///
    /// The returned state is terminal: Rejected when an admission gate
    /// refused the plan, otherwise the outcome of execution.
    pub async fn submit(
        &self,
        plan: Plan,
        ctx: SessionContext,
    ) -> Result<ExecutionState, SubmitError> {
        let mut plan = plan;
        if plan.submitted_at_ms == 0 {
            plan.submitted_at_ms = self.clock.epoch_ms();
        }
        iml_plan::validate(&plan)?;

        let now = self.clock.epoch_ms();
        let mut state = ExecutionState::new(&plan, now);
        self.propagator.bind(plan.plan_id, ctx.clone());
        self.emit(&plan.plan_id, "submitted", "plan.submitted", json!({"description": plan.description}));

        if let Some(rejection) = self.admission_check(&plan, &ctx).await {
            state.reject(rejection, self.clock.epoch_ms());
            self.store.save_plan(&state, self.clock.epoch_ms())?;
            self.emit(
                &plan.plan_id,
                "rejected",
                "plan.rejected",
                json!({"source": state.rejection_details.as_ref().map(|d| d.source.to_string())}),
            );
            self.propagator.unbind(&plan.plan_id);
            return Ok(state);
        }

        let result = match self.store.save_plan(&state, now) {
            Ok(()) => self.run(&plan, state).await,
            Err(e) => Err(e.into()),
        };
        self.propagator.unbind(&plan.plan_id);
        result
    }

    /// Run every admission gate; `Some` is a refusal.
    async fn admission_check(
        &self,
        plan: &Plan,
        ctx: &SessionContext,
    ) -> Option<RejectionDetails> {
        if let Some(limiter) = &self.limiter {
            let identity =
                ctx.session_id.map(|s| s.to_string()).unwrap_or_else(|| "anonymous".to_string());
            if let Err(e) = limiter.check(&identity, "submit_plan") {
                tracing::warn!(plan_id = %plan.plan_id, error = %e, "submission rate-limited");
                return Some(RejectionDetails {
                    source: RejectionSource::RateLimiter,
                    verdict: "reject".to_string(),
                    risk_score: 0.0,
                    threat_types: Vec::new(),
                    scanner_findings: Vec::new(),
                    recommendations: vec![format!("{e}; retry after the window passes")],
                    clarification_needed: false,
                });
            }
        }

        if let Err(e) = self.policy.check_plan(plan) {
            tracing::warn!(plan_id = %plan.plan_id, error = %e, "plan refused by permission guard");
            return Some(RejectionDetails {
                source: RejectionSource::PermissionGuard,
                verdict: "reject".to_string(),
                risk_score: 0.0,
                threat_types: Vec::new(),
                scanner_findings: Vec::new(),
                recommendations: vec![e.to_string()],
                clarification_needed: false,
            });
        }

        let report = self.pipeline.scan(plan).await;
        if report.is_rejected() {
            return Some(report.to_rejection_details());
        }
        None
    }

    /// Drive an admitted plan to a terminal state.
    async fn run(
        &self,
        plan: &Plan,
        mut state: ExecutionState,
    ) -> Result<ExecutionState, SubmitError> {
        let _permit = Arc::clone(&self.global_slots)
            .acquire_owned()
            .await
            .map_err(|_| SubmitError::ShuttingDown)?;

        let cancel = CancellationToken::new();
        self.running.lock().insert(plan.plan_id, cancel.clone());

        state.status = PlanStatus::Running;
        state.started_at_ms = Some(self.clock.epoch_ms());
        self.store.save_plan(&state, self.clock.epoch_ms())?;
        self.emit(&plan.plan_id, "started", "plan.started", json!({}));

        let shared = Arc::new(Mutex::new(state));
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wave = {
                let guard = shared.lock();
                ready_wave(plan, &guard)
            };
            if wave.is_empty() {
                let settled = shared.lock().is_settled();
                if !settled {
                    // Remaining actions are unreachable (their predecessors
                    // ended without satisfying them).
                    self.skip_remaining(plan, &shared, "predecessor did not complete");
                }
                break;
            }

            {
                let mut guard = shared.lock();
                let now = self.clock.epoch_ms();
                for id in &wave {
                    guard.transition(id, ActionState::Waiting, now)?;
                }
                self.persist(&guard);
            }
            tracing::debug!(plan_id = %plan.plan_id, wave = ?wave, "wave scheduled");

            let outcomes = join_all(
                wave.iter().map(|id| self.run_action(plan, id, &shared, &cancel)),
            )
            .await;

            // Cascade: abort-policy failures skip their transitive dependents.
            for (id, end) in wave.iter().zip(outcomes) {
                if end != ActionState::Failed {
                    continue;
                }
                let aborts = plan
                    .action(id)
                    .is_some_and(|a| a.on_failure == iml_core::FailurePolicy::Abort);
                if aborts {
                    self.skip_descendants(plan, id, &shared);
                }
            }
        }

        let mut state = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner(),
            Err(arc) => arc.lock().clone(),
        };

        if cancel.is_cancelled() {
            self.skip_non_terminal(&mut state, "plan cancelled");
            state.status = PlanStatus::Cancelled;
        } else {
            state.status = state.derive_outcome();
        }

        if state.status == PlanStatus::Failed && plan.rollback_on_failure {
            self.rollback_sweep(plan, &mut state).await;
        }

        state.ended_at_ms = Some(self.clock.epoch_ms());
        self.store.save_plan(&state, self.clock.epoch_ms())?;
        self.running.lock().remove(&plan.plan_id);
        self.emit(
            &plan.plan_id,
            state.status.to_string().as_str(),
            &format!("plan.{}", state.status),
            json!({"status": state.status}),
        );
        tracing::info!(plan_id = %plan.plan_id, status = %state.status, "plan settled");
        Ok(state)
    }

    /// Execute one action of the current wave; returns its terminal state.
    async fn run_action(
        &self,
        plan: &Plan,
        action_id: &str,
        shared: &Arc<Mutex<ExecutionState>>,
        cancel: &CancellationToken,
    ) -> ActionState {
        let action = match plan.action(action_id) {
            Some(a) => a.clone(),
            None => return ActionState::Failed,
        };

        let mut params = action.params.clone();

        // Approval gate: the action sits in Waiting until the caller answers.
        if action.requires_approval {
            match self.await_approval(plan, &action, cancel).await {
                ApprovalOutcome::Proceed(override_params) => {
                    if let Some(p) = override_params {
                        params = p;
                    }
                }
                ApprovalOutcome::Rejected => {
                    return self.fail_action(plan, shared, action_id, "approval rejected", 0);
                }
                ApprovalOutcome::Cancelled => {
                    return self.skip_action(plan, shared, action_id, "plan cancelled");
                }
            }
        }

        // Late-bound template resolution against completed predecessors.
        let memory = SessionMemory::new(Arc::clone(&self.store), plan.session_id);
        let resolved = {
            let records = shared.lock().actions.clone();
            let inputs = ResolveInputs {
                records: &records,
                memory: &memory,
                strict_memory: self.strict_memory,
            };
            match resolve_params(&params, &inputs) {
                Ok(v) => v,
                Err(e) => {
                    return self.fail_action(plan, shared, action_id, &e.to_string(), 0);
                }
            }
        };

        // Permission re-check: resolved values can change allowability.
        if let Err(e) = self.policy.check_action(&action.module, &action.action, &resolved) {
            return self.fail_action(plan, shared, action_id, &e.to_string(), 0);
        }

        // Module slot under the per-module ceiling.
        let _slot = match self.module_slots.get(&action.module) {
            Some(semaphore) => {
                tokio::select! {
                    permit = Arc::clone(semaphore).acquire_owned() => match permit {
                        Ok(p) => Some(p),
                        Err(_) => {
                            return self.fail_action(plan, shared, action_id, "module slots closed", 0)
                        }
                    },
                    _ = cancel.cancelled() => {
                        return self.skip_action(plan, shared, action_id, "plan cancelled");
                    }
                }
            }
            None => None,
        };

        {
            let mut guard = shared.lock();
            let now = self.clock.epoch_ms();
            if guard.transition(action_id, ActionState::Running, now).is_err() {
                return guard.action(action_id).map(|r| r.state).unwrap_or(ActionState::Failed);
            }
            self.persist(&guard);
        }
        self.emit(
            &plan.plan_id,
            &format!("action.{action_id}.started"),
            "action.started",
            json!({"action_id": action_id, "module": action.module, "action": action.action}),
        );

        // Dispatch with retry: base * 2^(attempt-1), ±20% jitter.
        let retry = action.retry_policy();
        let ctx = ActionContext { cancel: cancel.clone(), session_id: plan.session_id };
        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            match self
                .registry
                .dispatch(&action.module, &action.action, resolved.clone(), &ctx)
                .await
            {
                Ok(value) => break Ok(value),
                Err(ModuleError::Cancelled) => break Err("cancelled".to_string()),
                Err(e) if attempt < retry.max_attempts && !cancel.is_cancelled() => {
                    let backoff = backoff_with_jitter(retry.backoff_seconds, attempt);
                    tracing::debug!(
                        plan_id = %plan.plan_id,
                        action_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "action retry scheduled"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => break Err("cancelled".to_string()),
                    }
                }
                Err(e) => break Err(e.to_string()),
            }
        };

        match outcome {
            Ok(value) => {
                let sanitized = self.sanitizer.sanitize_value(&value);
                if let Some(memory_spec) = &action.memory {
                    if let Some(key) = &memory_spec.write_key {
                        memory.write(key, &sanitized, self.clock.epoch_ms());
                    }
                }
                {
                    let mut guard = shared.lock();
                    let now = self.clock.epoch_ms();
                    if let Some(record) = guard.actions.get_mut(action_id) {
                        record.attempts = attempt;
                        record.result = Some(sanitized);
                    }
                    if let Err(e) = guard.transition(action_id, ActionState::Completed, now) {
                        tracing::error!(action_id, error = %e, "completion transition refused");
                    }
                    self.persist(&guard);
                }
                self.emit(
                    &plan.plan_id,
                    &format!("action.{action_id}.completed"),
                    "action.completed",
                    json!({"action_id": action_id, "attempts": attempt}),
                );
                ActionState::Completed
            }
            Err(error) => self.fail_action(plan, shared, action_id, &error, attempt),
        }
    }

    /// Wait for an approval decision, honouring cancellation and `defer`.
    async fn await_approval(
        &self,
        plan: &Plan,
        action: &iml_core::Action,
        cancel: &CancellationToken,
    ) -> ApprovalOutcome {
        let spec = action.approval.clone().unwrap_or_default();
        loop {
            let request = ApprovalRequest {
                plan_id: plan.plan_id,
                action_id: action.id.clone(),
                prompt: if spec.prompt.is_empty() {
                    format!("approve {}.{}?", action.module, action.action)
                } else {
                    spec.prompt.clone()
                },
                clarification_options: spec.clarification_options.clone(),
            };
            let rx = match self.approvals.register(request) {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(plan_id = %plan.plan_id, action_id = %action.id, error = %e, "approval gate refused");
                    return ApprovalOutcome::Rejected;
                }
            };
            self.emit(
                &plan.plan_id,
                &format!("action.{}.approval_requested", action.id),
                "approval.requested",
                json!({"action_id": action.id, "prompt": spec.prompt}),
            );

            let decision = tokio::select! {
                result = rx => match result {
                    Ok(d) => d,
                    // Sender dropped: the gate was discarded by cancellation.
                    Err(_) => return ApprovalOutcome::Cancelled,
                },
                _ = cancel.cancelled() => return ApprovalOutcome::Cancelled,
            };

            match decision {
                ApprovalDecision::Approve => return ApprovalOutcome::Proceed(None),
                ApprovalDecision::ApproveWithChanges { params } => {
                    return ApprovalOutcome::Proceed(Some(params))
                }
                ApprovalDecision::Choose { option_index } => {
                    let mut params = action.params.clone();
                    if let Some(option) = spec.clarification_options.get(option_index) {
                        if let Value::Object(map) = &mut params {
                            map.insert("clarification".to_string(), json!(option));
                        }
                    }
                    return ApprovalOutcome::Proceed(Some(params));
                }
                ApprovalDecision::Reject => return ApprovalOutcome::Rejected,
                ApprovalDecision::Defer => {
                    tracing::debug!(plan_id = %plan.plan_id, action_id = %action.id, "approval deferred");
                    continue;
                }
            }
        }
    }

    /// Run compensation bodies for completed actions, newest first.
    async fn rollback_sweep(&self, plan: &Plan, state: &mut ExecutionState) {
        let order = topo_order(plan);
        for action_id in order.iter().rev() {
            let completed = state
                .action(action_id)
                .is_some_and(|r| r.state == ActionState::Completed);
            if !completed {
                continue;
            }
            let Some(action) = plan.action(action_id) else { continue };
            let Some(rollback) = &action.rollback else { continue };

            let memory = SessionMemory::new(Arc::clone(&self.store), plan.session_id);
            let inputs = ResolveInputs {
                records: &state.actions,
                memory: &memory,
                strict_memory: false,
            };
            let params = match resolve_params(&rollback.params, &inputs) {
                Ok(v) => v,
                Err(e) => {
                    self.record_rollback_failure(state, action_id, &e.to_string());
                    continue;
                }
            };

            let ctx = ActionContext { cancel: CancellationToken::new(), session_id: plan.session_id };
            match self.registry.dispatch(&rollback.module, &rollback.action, params, &ctx).await {
                Ok(_) => {
                    let now = self.clock.epoch_ms();
                    if let Err(e) = state.transition(action_id, ActionState::RolledBack, now) {
                        tracing::error!(action_id, error = %e, "rollback transition refused");
                    }
                    self.persist(state);
                    self.emit(
                        &plan.plan_id,
                        &format!("action.{action_id}.rolled_back"),
                        "action.rolled_back",
                        json!({"action_id": action_id}),
                    );
                }
                // Rollback failures are recorded, never retried recursively.
                Err(e) => self.record_rollback_failure(state, action_id, &e.to_string()),
            }
        }
    }

    fn record_rollback_failure(&self, state: &mut ExecutionState, action_id: &str, error: &str) {
        tracing::error!(action_id, error, "rollback failed");
        if let Some(record) = state.actions.get_mut(action_id) {
            record.rollback_error = Some(error.to_string());
        }
        self.persist(state);
    }

    fn fail_action(
        &self,
        plan: &Plan,
        shared: &Arc<Mutex<ExecutionState>>,
        action_id: &str,
        error: &str,
        attempts: u32,
    ) -> ActionState {
        {
            let mut guard = shared.lock();
            let now = self.clock.epoch_ms();
            if let Some(record) = guard.actions.get_mut(action_id) {
                if attempts > 0 {
                    record.attempts = attempts;
                }
                record.error = Some(error.to_string());
            }
            if let Err(e) = guard.transition(action_id, ActionState::Failed, now) {
                tracing::error!(action_id, error = %e, "failure transition refused");
            }
            self.persist(&guard);
        }
        tracing::warn!(plan_id = %plan.plan_id, action_id, error, "action failed");
        self.emit(
            &plan.plan_id,
            &format!("action.{action_id}.failed"),
            "action.failed",
            json!({"action_id": action_id, "error": error}),
        );
        ActionState::Failed
    }

    fn skip_action(
        &self,
        plan: &Plan,
        shared: &Arc<Mutex<ExecutionState>>,
        action_id: &str,
        reason: &str,
    ) -> ActionState {
        {
            let mut guard = shared.lock();
            let now = self.clock.epoch_ms();
            if let Some(record) = guard.actions.get_mut(action_id) {
                record.error = Some(reason.to_string());
            }
            if let Err(e) = guard.transition(action_id, ActionState::Skipped, now) {
                tracing::error!(action_id, error = %e, "skip transition refused");
            }
            self.persist(&guard);
        }
        self.emit(
            &plan.plan_id,
            &format!("action.{action_id}.skipped"),
            "action.skipped",
            json!({"action_id": action_id, "reason": reason}),
        );
        ActionState::Skipped
    }

    /// Skip the transitive dependents of a failed action.
    fn skip_descendants(&self, plan: &Plan, failed_id: &str, shared: &Arc<Mutex<ExecutionState>>) {
        for dependent in plan.transitive_dependents(failed_id) {
            let pending = {
                let guard = shared.lock();
                guard
                    .action(&dependent)
                    .is_some_and(|r| !r.state.is_terminal())
            };
            if pending {
                self.skip_action(
                    plan,
                    shared,
                    &dependent,
                    &format!("predecessor {failed_id} failed"),
                );
            }
        }
    }

    fn skip_remaining(&self, plan: &Plan, shared: &Arc<Mutex<ExecutionState>>, reason: &str) {
        let stuck: Vec<String> = {
            let guard = shared.lock();
            guard
                .actions
                .iter()
                .filter(|(_, r)| !r.state.is_terminal())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in stuck {
            self.skip_action(plan, shared, &id, reason);
        }
    }

    fn skip_non_terminal(&self, state: &mut ExecutionState, reason: &str) {
        let now = self.clock.epoch_ms();
        for (id, record) in state.actions.iter_mut() {
            if !record.state.is_terminal() {
                record.error = Some(reason.to_string());
                record.state = ActionState::Skipped;
                record.ended_at_ms = Some(now);
                tracing::debug!(action_id = %id, reason, "skipped at teardown");
            }
        }
        self.persist(state);
    }

    fn persist(&self, state: &ExecutionState) {
        if let Err(e) = self.store.save_plan(state, self.clock.epoch_ms()) {
            tracing::error!(plan_id = %state.plan_id, error = %e, "state persist failed");
        }
    }

    fn emit(&self, plan_id: &PlanId, suffix: &str, kind: &str, payload: Value) {
        let topic = format!("plan.{plan_id}.{suffix}");
        let mut event =
            UniversalEvent::new(kind, topic, "executor", payload, self.clock.epoch_ms());
        self.propagator.stamp(plan_id, &mut event);
        self.bus.publish(event);
    }
}

enum ApprovalOutcome {
    Proceed(Option<Value>),
    Rejected,
    Cancelled,
}

/// `base * 2^(attempt-1)` with ±20% jitter.
fn backoff_with_jitter(base_seconds: f64, attempt: u32) -> Duration {
    let exp = base_seconds.max(0.0) * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_secs_f64((exp * jitter).clamp(0.0, 3_600.0))
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
