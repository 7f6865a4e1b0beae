// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup wiring, single-instance lock, shutdown.

use crate::env::Config;
use crate::launcher::ExecutorLauncher;
use fs2::FileExt;
use iml_core::{Clock, InProcessBus, SystemClock};
use iml_engine::{
    ExecutorConfig, FilesystemModule, ModuleRegistry, PlanExecutor, PlanGroupExecutor, ShellModule,
};
use iml_security::{
    HeuristicScanner, IntentVerifier, IntentVerifierConfig, MlScannerAdapter, PermissionPolicy,
    Profile, Scanner, SecurityPipeline,
};
use iml_storage::{StateStore, TriggerStore};
use iml_triggers::{TriggerDaemon, TriggerDaemonConfig};
use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another daemon instance holds {0}")]
    AlreadyRunning(std::path::PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] iml_storage::StorageError),
    #[error("trigger daemon error: {0}")]
    Triggers(#[from] iml_triggers::TriggerError),
    #[error("unknown security profile {0:?}")]
    UnknownProfile(String),
}

/// Live daemon components.
pub struct DaemonState {
    pub config: Config,
    pub executor: Arc<PlanExecutor>,
    pub group: Arc<PlanGroupExecutor<SystemClock>>,
    pub triggers: Option<Arc<TriggerDaemon>>,
    pub bus: Arc<InProcessBus>,
    pub start_time: Instant,
    // NOTE(lifetime): held to maintain the exclusive lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("config", &self.config)
            .field("start_time", &self.start_time)
            .finish_non_exhaustive()
    }
}

fn parse_profile(name: &str) -> Result<Profile, LifecycleError> {
    match name {
        "readonly" => Ok(Profile::Readonly),
        "local_worker" => Ok(Profile::LocalWorker),
        "power_user" => Ok(Profile::PowerUser),
        "unrestricted" => Ok(Profile::Unrestricted),
        other => Err(LifecycleError::UnknownProfile(other.to_string())),
    }
}

fn build_pipeline(config: &Config) -> SecurityPipeline {
    let mut pipeline = SecurityPipeline::default();
    for name in &config.security.scanners {
        let scanner: Option<Arc<dyn Scanner>> = match name.as_str() {
            "heuristic" => Some(Arc::new(HeuristicScanner::new())),
            "ml" => config.security.ml_endpoint.as_ref().map(|endpoint| {
                Arc::new(MlScannerAdapter::new(
                    "ml_classifier",
                    endpoint.clone(),
                    Duration::from_secs(config.security.ml_timeout_secs),
                )) as Arc<dyn Scanner>
            }),
            "intent" => config.security.intent.as_ref().map(|section| {
                let mut verifier_config = match section.provider.as_str() {
                    "openai" => IntentVerifierConfig::openai(&section.api_key, &section.model),
                    "ollama" => IntentVerifierConfig::ollama(&section.base_url, &section.model),
                    _ => IntentVerifierConfig::anthropic(&section.api_key, &section.model),
                };
                if !section.base_url.is_empty() {
                    verifier_config.base_url = section.base_url.clone();
                }
                if section.timeout_secs > 0 {
                    verifier_config.timeout = Duration::from_secs(section.timeout_secs);
                }
                verifier_config.strict = section.strict;
                Arc::new(IntentVerifier::new(verifier_config)) as Arc<dyn Scanner>
            }),
            other => {
                tracing::warn!(scanner = other, "unknown scanner tier skipped");
                None
            }
        };
        match scanner {
            Some(s) => pipeline.push(s),
            None => tracing::warn!(scanner = %name, "scanner tier not configured; skipped"),
        }
    }
    pipeline
}

/// Build and start every component from a resolved config.
pub async fn startup(config: Config) -> Result<DaemonState, LifecycleError> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)?;

    // Single-instance lock.
    let lock_path = config.lock_path();
    let lock_file = File::create(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::AlreadyRunning(lock_path.clone()))?;
    std::fs::write(&lock_path, std::process::id().to_string())?;

    let clock = SystemClock;
    let store = Arc::new(StateStore::open(&config.db_path())?);
    let interrupted = store.mark_interrupted(clock.epoch_ms())?;
    if !interrupted.is_empty() {
        tracing::warn!(count = interrupted.len(), "failed plans left over from a previous run");
    }

    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(FilesystemModule::new()));
    registry.register(Arc::new(ShellModule::new()));

    let profile = parse_profile(&config.security.profile)?;
    let policy = PermissionPolicy::for_profile(profile, config.security.sandbox_paths.clone());
    let pipeline = build_pipeline(&config);
    let bus = Arc::new(InProcessBus::new());

    let submit_rate = match config.executor.submit_rate_per_hour {
        0 => None,
        limit => Some((limit, 3_600)),
    };
    let executor = Arc::new(PlanExecutor::new(
        iml_engine::executor::ExecutorDeps {
            registry: Arc::new(registry),
            pipeline,
            policy,
            store: Arc::clone(&store),
            bus: bus.clone(),
        },
        ExecutorConfig {
            max_concurrent_plans: config.executor.max_concurrent_plans,
            resource_limits: config.resource_limits.clone(),
            strict_memory: config.executor.strict_memory,
            submit_rate,
        },
        clock.clone(),
    ));
    let group = Arc::new(PlanGroupExecutor::new(Arc::clone(&executor), clock.clone()));

    let triggers = if config.triggers.enabled {
        let trigger_store = Arc::new(TriggerStore::open(&config.trigger_db_path())?);
        let daemon = TriggerDaemon::new(
            trigger_store,
            Arc::new(ExecutorLauncher::new(Arc::clone(&executor))),
            bus.clone(),
            TriggerDaemonConfig {
                max_concurrent_plans: config.triggers.max_concurrent_plans,
                ..TriggerDaemonConfig::default()
            },
            clock,
        );
        daemon.start().await?;
        Some(daemon)
    } else {
        tracing::info!("trigger daemon disabled by config");
        None
    };

    tracing::info!(state_dir = %state_dir.display(), "daemon components started");
    Ok(DaemonState {
        config,
        executor,
        group,
        triggers,
        bus,
        start_time: Instant::now(),
        lock_file,
    })
}

impl DaemonState {
    /// Graceful teardown: stop triggers first so nothing fires into a
    /// shutting-down executor.
    pub async fn shutdown(&self) {
        if let Some(triggers) = &self.triggers {
            triggers.stop().await;
        }
        tracing::info!("daemon shut down");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
