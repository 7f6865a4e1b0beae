// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger daemon: lifecycle, fire dispatch, conflict resolution, health.

use crate::conflict::{ConflictResolver, LockOutcome};
use crate::definition::{
    ConflictPolicy, TriggerDefinition, TriggerId, TriggerPriority, TriggerState,
};
use crate::scheduler::{FireGate, FireScheduler, GateVerdict, ScheduledFire};
use crate::watchers::{spawn_watcher, WatcherEvent, WatcherHandle};
use async_trait::async_trait;
use iml_core::{Clock, EventBus, PlanId, SessionContext, SystemClock, UniversalEvent};
use iml_storage::{StorageError, TriggerStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of a launched plan, as the daemon sees it.
#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub plan_id: PlanId,
    pub succeeded: bool,
}

/// How the daemon submits plans.
///
/// Triggers reference plans only as templates; the launcher owns parsing,
/// admission, and execution. `launch` returns once the plan settles so the
/// daemon can release resource locks afterwards.
#[async_trait]
pub trait PlanLauncher: Send + Sync {
    async fn launch(&self, plan: Value, ctx: SessionContext) -> Result<LaunchResult, String>;
    async fn cancel(&self, plan_id: &PlanId) -> bool;
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("trigger chain depth {depth} exceeds limit {max}")]
    ChainDepthExceeded { depth: u32, max: u32 },
    #[error("trigger not found: {0}")]
    NotFound(String),
    #[error("invalid trigger definition: {0}")]
    InvalidDefinition(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct TriggerDaemonConfig {
    /// Ceiling on concurrently running trigger-launched plans.
    pub max_concurrent_plans: usize,
    /// Cadence of the expiry sweep.
    pub expiry_sweep: Duration,
}

impl Default for TriggerDaemonConfig {
    fn default() -> Self {
        Self { max_concurrent_plans: 4, expiry_sweep: Duration::from_secs(30) }
    }
}

struct RunningPlan {
    plan_id: PlanId,
    priority: TriggerPriority,
}

/// Owns every registered trigger: watchers, fire scheduling, health.
pub struct TriggerDaemon<C: Clock + 'static = SystemClock> {
    store: Arc<TriggerStore>,
    launcher: Arc<dyn PlanLauncher>,
    bus: Arc<dyn EventBus>,
    clock: C,
    config: TriggerDaemonConfig,
    watchers: Mutex<HashMap<TriggerId, WatcherHandle>>,
    running: Mutex<HashMap<TriggerId, RunningPlan>>,
    gates: Mutex<HashMap<TriggerId, FireGate>>,
    scheduler: FireScheduler,
    resolver: ConflictResolver,
    plan_slots: Arc<Semaphore>,
    events_tx: Mutex<Option<mpsc::Sender<WatcherEvent>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Clock + 'static> TriggerDaemon<C> {
    pub fn new(
        store: Arc<TriggerStore>,
        launcher: Arc<dyn PlanLauncher>,
        bus: Arc<dyn EventBus>,
        config: TriggerDaemonConfig,
        clock: C,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            launcher,
            bus,
            clock,
            plan_slots: Arc::new(Semaphore::new(config.max_concurrent_plans.max(1))),
            config,
            watchers: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            scheduler: FireScheduler::new(),
            resolver: ConflictResolver::new(),
            events_tx: Mutex::new(None),
            shutdown: Mutex::new(None),
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Load enabled triggers, start their watchers, start the dispatch and
    /// health loops.
    pub async fn start(self: &Arc<Self>) -> Result<(), TriggerError> {
        let token = CancellationToken::new();
        *self.shutdown.lock() = Some(token.clone());

        let (tx, rx) = mpsc::channel::<WatcherEvent>(256);
        *self.events_tx.lock() = Some(tx);

        let mut started = 0usize;
        for row in self.store.list_enabled()? {
            let Some(def) = TriggerDefinition::from_row(&row) else {
                tracing::warn!(trigger_id = %row.trigger_id, "undeserialisable trigger skipped");
                continue;
            };
            if def.state == TriggerState::Failed {
                // Failed triggers stay down until explicitly re-enabled.
                continue;
            }
            self.arm(&def)?;
            started += 1;
        }
        tracing::info!(triggers = started, "trigger daemon started");

        let daemon = Arc::clone(self);
        let dispatch_token = token.clone();
        self.loops.lock().push(tokio::spawn(async move {
            daemon.dispatch_loop(rx, dispatch_token).await;
        }));

        let daemon = Arc::clone(self);
        self.loops.lock().push(tokio::spawn(async move {
            daemon.health_loop(token).await;
        }));

        Ok(())
    }

    /// Stop the health loop, all watchers, and the dispatch loop.
    pub async fn stop(&self) {
        if let Some(token) = self.shutdown.lock().take() {
            token.cancel();
        }
        let handles: Vec<WatcherHandle> = {
            let mut watchers = self.watchers.lock();
            watchers.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.stop().await;
        }
        *self.events_tx.lock() = None;
        let loops: Vec<JoinHandle<()>> = self.loops.lock().drain(..).collect();
        for task in loops {
            let _ = task.await;
        }
        tracing::info!("trigger daemon stopped");
    }

    /// Register a trigger, enforcing the chain-depth guard.
    ///
    /// A registration arriving from a trigger-launched plan inherits
    /// `chain_depth + 1` from that plan's session context.
    pub fn register(
        &self,
        mut def: TriggerDefinition,
        ctx: &SessionContext,
    ) -> Result<TriggerId, TriggerError> {
        if ctx.trigger_id.is_some() {
            def.chain_depth = ctx.trigger_chain_depth + 1;
        }
        if def.chain_depth > def.max_chain_depth {
            return Err(TriggerError::ChainDepthExceeded {
                depth: def.chain_depth,
                max: def.max_chain_depth,
            });
        }

        def.state = if def.enabled { TriggerState::Registered } else { TriggerState::Inactive };
        let now = self.clock.epoch_ms();
        self.store.save(&def.to_row(now, now))?;
        self.emit(&def.trigger_id, "registered", json!({"name": def.name, "chain_depth": def.chain_depth}));

        if def.enabled {
            self.arm(&def)?;
        }
        tracing::info!(trigger_id = %def.trigger_id, name = %def.name, enabled = def.enabled, "trigger registered");
        Ok(def.trigger_id)
    }

    /// Spawn the watcher (when the daemon is running) and mark the trigger
    /// armed in the store.
    fn arm(&self, def: &TriggerDefinition) -> Result<(), TriggerError> {
        let armed_state = if def.condition.is_composite() {
            TriggerState::Watching
        } else {
            TriggerState::Active
        };
        if let Some(tx) = self.events_tx.lock().clone() {
            let handle = spawn_watcher(def.trigger_id, def.condition.clone(), tx);
            if let Some(old) = self.watchers.lock().insert(def.trigger_id, handle) {
                old.abort();
            }
        }
        self.store.set_state(def.trigger_id.as_str(), &armed_state.to_string(), self.clock.epoch_ms())?;
        Ok(())
    }

    pub fn activate(&self, trigger_id: &TriggerId) -> Result<(), TriggerError> {
        let def = self
            .get(trigger_id)?
            .ok_or_else(|| TriggerError::NotFound(trigger_id.to_string()))?;
        self.store.set_enabled(trigger_id.as_str(), true, self.clock.epoch_ms())?;
        let mut def = def;
        def.enabled = true;
        self.arm(&def)?;
        self.emit(trigger_id, "activated", json!({}));
        Ok(())
    }

    pub fn deactivate(&self, trigger_id: &TriggerId) -> Result<(), TriggerError> {
        if self.get(trigger_id)?.is_none() {
            return Err(TriggerError::NotFound(trigger_id.to_string()));
        }
        if let Some(handle) = self.watchers.lock().remove(trigger_id) {
            handle.abort();
        }
        self.scheduler.discard(trigger_id);
        self.store.set_enabled(trigger_id.as_str(), false, self.clock.epoch_ms())?;
        self.store.set_state(
            trigger_id.as_str(),
            &TriggerState::Inactive.to_string(),
            self.clock.epoch_ms(),
        )?;
        self.emit(trigger_id, "deactivated", json!({}));
        Ok(())
    }

    pub fn delete(&self, trigger_id: &TriggerId) -> Result<bool, TriggerError> {
        if let Some(handle) = self.watchers.lock().remove(trigger_id) {
            handle.abort();
        }
        self.scheduler.discard(trigger_id);
        Ok(self.store.delete(trigger_id.as_str())?)
    }

    pub fn get(&self, trigger_id: &TriggerId) -> Result<Option<TriggerDefinition>, TriggerError> {
        Ok(self
            .store
            .get(trigger_id.as_str())?
            .as_ref()
            .and_then(TriggerDefinition::from_row))
    }

    pub fn list(&self) -> Result<Vec<TriggerDefinition>, TriggerError> {
        Ok(self
            .store
            .list()?
            .iter()
            .filter_map(TriggerDefinition::from_row)
            .collect())
    }

    async fn dispatch_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<WatcherEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(WatcherEvent::Fired(fire)) => self.on_fire(fire),
                    Some(WatcherEvent::Failed { trigger_id, error }) => {
                        self.on_watcher_failure(trigger_id, &error);
                    }
                    None => break,
                },
            }
        }
    }

    /// Gate a raw fire and queue it for a plan slot.
    fn on_fire(self: &Arc<Self>, fire: crate::watchers::TriggerFire) {
        let trigger_id = fire.trigger_id;
        let def = match self.get(&trigger_id) {
            Ok(Some(def)) if def.enabled => def,
            Ok(_) => return,
            Err(e) => {
                tracing::error!(trigger_id = %trigger_id, error = %e, "fire lookup failed");
                return;
            }
        };

        // Per-trigger rate limits.
        let verdict = self
            .gates
            .lock()
            .entry(trigger_id)
            .or_default()
            .admit(&def.throttle, self.clock.epoch_ms());
        if verdict != GateVerdict::Pass {
            tracing::debug!(trigger_id = %trigger_id, ?verdict, "fire throttled");
            self.record_throttle(&def, TriggerState::Throttled);
            return;
        }

        // Overlapping fires of one trigger are rejected outright.
        if self.running.lock().contains_key(&trigger_id) {
            tracing::debug!(trigger_id = %trigger_id, "fire dropped: plan already running");
            self.record_throttle(&def, def.state);
            return;
        }

        self.scheduler.push(fire, def.priority);
        self.drain();
    }

    /// Pull queued fires while plan slots are free; preempt for CRITICAL.
    fn drain(self: &Arc<Self>) {
        loop {
            if self.scheduler.is_empty() {
                return;
            }
            match Arc::clone(&self.plan_slots).try_acquire_owned() {
                Ok(permit) => {
                    let Some(scheduled) = self.scheduler.pop() else { return };
                    let daemon = Arc::clone(self);
                    tokio::spawn(async move {
                        daemon.fire_task(scheduled, permit).await;
                    });
                }
                Err(_) => {
                    // No slots. A CRITICAL fire may preempt a BACKGROUND
                    // plan belonging to another trigger.
                    if self.scheduler.peek_priority() == Some(TriggerPriority::Critical) {
                        let victim = self
                            .running
                            .lock()
                            .iter()
                            .find(|(_, r)| r.priority == TriggerPriority::Background)
                            .map(|(id, r)| (*id, r.plan_id));
                        if let Some((victim_id, plan_id)) = victim {
                            tracing::warn!(
                                victim = %victim_id,
                                plan_id = %plan_id,
                                "preempting background plan for critical fire"
                            );
                            let launcher = Arc::clone(&self.launcher);
                            tokio::spawn(async move {
                                launcher.cancel(&plan_id).await;
                            });
                        }
                    }
                    return;
                }
            }
        }
    }

    /// One queued fire: lock acquisition, plan launch, health accounting.
    async fn fire_task(
        self: Arc<Self>,
        scheduled: ScheduledFire,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let trigger_id = scheduled.fire.trigger_id;
        let Ok(Some(def)) = self.get(&trigger_id) else { return };
        let plan_id = PlanId::new();

        // Resource-lock conflict resolution.
        let mut held_lock: Option<String> = None;
        if let Some(lock) = &def.resource_lock {
            let outcome = match def.conflict_policy {
                ConflictPolicy::Reject => {
                    if self.resolver.try_acquire(lock, plan_id) {
                        LockOutcome::Acquired
                    } else {
                        LockOutcome::Dropped
                    }
                }
                ConflictPolicy::Queue => self.resolver.acquire_queued(lock, plan_id).await,
                ConflictPolicy::Preempt => {
                    if let Some(holder) = self.resolver.holder(lock) {
                        tracing::warn!(lock, holder = %holder, "preempting lock holder");
                        self.launcher.cancel(&holder).await;
                    }
                    // Wait for the preempted plan's teardown (rollback
                    // included) before taking the lock.
                    self.resolver.acquire_queued(lock, plan_id).await
                }
            };
            match outcome {
                LockOutcome::Acquired => held_lock = Some(lock.clone()),
                LockOutcome::Dropped => {
                    tracing::debug!(trigger_id = %trigger_id, lock, "fire dropped on lock conflict");
                    self.record_throttle(&def, def.state);
                    drop(permit);
                    self.drain();
                    return;
                }
            }
        }

        let now = self.clock.epoch_ms();
        let _ = self.store.set_state(
            trigger_id.as_str(),
            &TriggerState::Fired.to_string(),
            now,
        );
        let mut fired = UniversalEvent::new(
            "trigger.fired",
            format!("trigger.{trigger_id}.fired"),
            "trigger_daemon",
            scheduled.fire.payload.clone(),
            now,
        );
        let launch_event = fired.spawn_child(
            "plan.launched",
            format!("trigger.{trigger_id}.plan"),
            json!({"plan_id": plan_id}),
            now,
        );
        self.bus.publish(fired);
        self.bus.publish(launch_event);

        self.running
            .lock()
            .insert(trigger_id, RunningPlan { plan_id, priority: def.priority });

        let ctx = SessionContext {
            session_id: None,
            correlation_id: Some(format!("trigger:{trigger_id}")),
            trigger_id: Some(trigger_id.to_string()),
            trigger_chain_depth: def.chain_depth,
        };
        let plan = instantiate_plan(&def, plan_id);
        let started = self.clock.now();
        let result = self.launcher.launch(plan, ctx).await;
        let latency_ms = (self.clock.now() - started).as_millis() as u64;

        self.running.lock().remove(&trigger_id);
        if let Some(lock) = held_lock {
            self.resolver.release(&lock, &plan_id);
        }

        // Health and re-arm against a fresh copy; the watcher may have
        // reported meanwhile.
        if let Ok(Some(mut fresh)) = self.get(&trigger_id) {
            match &result {
                Ok(r) if r.succeeded => fresh.health.record_fire(latency_ms),
                Ok(_) => {
                    fresh.health.record_fire(latency_ms);
                    fresh.health.record_failure("plan did not succeed");
                }
                Err(e) => fresh.health.record_failure(e.clone()),
            }
            if fresh.condition.is_one_shot() {
                fresh.enabled = false;
                fresh.state = TriggerState::Fired;
                if let Some(handle) = self.watchers.lock().remove(&trigger_id) {
                    handle.abort();
                }
            } else if fresh.state == TriggerState::Fired {
                fresh.state = if fresh.condition.is_composite() {
                    TriggerState::Watching
                } else {
                    TriggerState::Active
                };
            }
            self.persist(&fresh);
        }

        drop(permit);
        self.drain();
    }

    fn on_watcher_failure(&self, trigger_id: TriggerId, error: &str) {
        tracing::error!(trigger_id = %trigger_id, error, "watcher failed; trigger disabled");
        if let Some(handle) = self.watchers.lock().remove(&trigger_id) {
            handle.abort();
        }
        if let Ok(Some(mut def)) = self.get(&trigger_id) {
            def.health.record_failure(error);
            def.state = TriggerState::Failed;
            self.persist(&def);
        }
        self.emit(&trigger_id, "failed", json!({"error": error}));
    }

    async fn health_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.expiry_sweep) => {
                    match self.store.purge_expired(self.clock.epoch_ms()) {
                        Ok(expired) => {
                            for id in expired {
                                let trigger_id = TriggerId::from_string(&id);
                                if let Some(handle) = self.watchers.lock().remove(&trigger_id) {
                                    handle.abort();
                                }
                                self.scheduler.discard(&trigger_id);
                                tracing::info!(trigger_id = %trigger_id, "expired trigger purged");
                                self.emit(&trigger_id, "expired", json!({}));
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                    }
                }
            }
        }
    }

    fn record_throttle(&self, def: &TriggerDefinition, state: TriggerState) {
        if let Ok(Some(mut fresh)) = self.get(&def.trigger_id) {
            fresh.health.record_throttle();
            fresh.state = state;
            self.persist(&fresh);
        }
        self.emit(&def.trigger_id, "throttled", json!({}));
    }

    /// Save a definition back, preserving its created_at column.
    fn persist(&self, def: &TriggerDefinition) {
        let now = self.clock.epoch_ms();
        let created = self
            .store
            .get(def.trigger_id.as_str())
            .ok()
            .flatten()
            .map(|r| r.created_at_ms)
            .unwrap_or(now);
        if let Err(e) = self.store.save(&def.to_row(created, now)) {
            tracing::error!(trigger_id = %def.trigger_id, error = %e, "trigger persist failed");
        }
    }

    fn emit(&self, trigger_id: &TriggerId, what: &str, payload: Value) {
        self.bus.publish(UniversalEvent::new(
            format!("trigger.{what}"),
            format!("trigger.{trigger_id}.{what}"),
            "trigger_daemon",
            payload,
            self.clock.epoch_ms(),
        ));
    }
}

/// Fill protocol defaults and the fresh plan id into a template.
fn instantiate_plan(def: &TriggerDefinition, plan_id: PlanId) -> Value {
    let mut plan = def.plan_template.clone();
    if let Value::Object(map) = &mut plan {
        map.insert("plan_id".to_string(), json!(plan_id));
        map.entry("protocol_version".to_string()).or_insert(json!("2.0"));
        map.entry("plan_mode".to_string()).or_insert(json!("direct"));
        map.entry("description".to_string())
            .or_insert(json!(format!("fire of trigger {}", def.name)));
        map.entry("actions".to_string()).or_insert(json!([]));
    }
    plan
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
