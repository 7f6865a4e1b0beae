// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watcher tasks: one long-lived task per trigger.
//!
//! A watcher observes its condition and reports through the daemon's event
//! channel. Errors are caught and classified: a failing watcher takes down
//! its trigger (state Failed), never the daemon.

mod composite;
mod fs;
mod system;
mod temporal;

use crate::condition::TriggerCondition;
use crate::definition::TriggerId;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One observed firing of a trigger's condition.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFire {
    pub trigger_id: TriggerId,
    pub fired_at_ms: u64,
    /// Condition-specific detail (path, process name, metric reading).
    pub payload: Value,
}

/// What a watcher task reports to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    Fired(TriggerFire),
    /// The watcher hit an unrecoverable error and stopped.
    Failed { trigger_id: TriggerId, error: String },
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("invalid cron expression {0:?}")]
    InvalidSchedule(String),
    #[error("filesystem watch failed: {0}")]
    Notify(String),
    #[error("metric source unavailable: {0}")]
    Metrics(String),
    #[error("daemon channel closed")]
    Closed,
}

/// Running watcher: a cancellation token plus the task itself.
pub struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signal the watcher to stop and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    pub fn abort(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Spawn the watcher task for a trigger's condition.
pub fn spawn_watcher(
    trigger_id: TriggerId,
    condition: TriggerCondition,
    events: mpsc::Sender<WatcherEvent>,
) -> WatcherHandle {
    let cancel = CancellationToken::new();
    let watch_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let result = watch(trigger_id, condition, &events, &watch_cancel).await;
        if let Err(e) = result {
            if !watch_cancel.is_cancelled() {
                tracing::error!(trigger_id = %trigger_id, error = %e, "watcher failed");
                let _ = events
                    .send(WatcherEvent::Failed { trigger_id, error: e.to_string() })
                    .await;
            }
        }
    });
    WatcherHandle { cancel, task }
}

async fn watch(
    trigger_id: TriggerId,
    condition: TriggerCondition,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    match condition {
        TriggerCondition::Temporal { schedule } => {
            temporal::watch(trigger_id, schedule, events, cancel).await
        }
        TriggerCondition::Filesystem { path, recursive, events: kinds } => {
            fs::watch(trigger_id, path, recursive, kinds, events, cancel).await
        }
        TriggerCondition::Process { process_name, event, poll_interval_seconds } => {
            system::watch_process(
                trigger_id,
                process_name,
                event,
                poll_interval_seconds,
                events,
                cancel,
            )
            .await
        }
        TriggerCondition::Resource {
            metric,
            threshold_percent,
            duration_seconds,
            poll_interval_seconds,
        } => {
            system::watch_resource(
                trigger_id,
                metric,
                threshold_percent,
                duration_seconds,
                poll_interval_seconds,
                events,
                cancel,
            )
            .await
        }
        TriggerCondition::Composite {
            op,
            conditions,
            timeout_seconds,
            silence_seconds,
            count,
            window_seconds,
        } => {
            composite::watch(
                trigger_id,
                composite::CompositeParams {
                    op,
                    conditions,
                    timeout_seconds,
                    silence_seconds,
                    count,
                    window_seconds,
                },
                events,
                cancel,
            )
            .await
        }
    }
}

/// Emit a fire on the daemon channel.
pub(crate) async fn send_fire(
    trigger_id: TriggerId,
    payload: Value,
    events: &mpsc::Sender<WatcherEvent>,
) -> Result<(), WatcherError> {
    let fire = TriggerFire { trigger_id, fired_at_ms: epoch_ms(), payload };
    events.send(WatcherEvent::Fired(fire)).await.map_err(|_| WatcherError::Closed)
}

pub(crate) fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "watchers_tests.rs"]
mod tests;
