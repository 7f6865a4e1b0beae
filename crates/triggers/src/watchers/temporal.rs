// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interval, cron, and one-shot timers.

use super::{epoch_ms, send_fire, WatcherError, WatcherEvent};
use crate::condition::TemporalSchedule;
use crate::definition::TriggerId;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(super) async fn watch(
    trigger_id: TriggerId,
    schedule: TemporalSchedule,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    match schedule {
        TemporalSchedule::Interval { seconds } => {
            interval(trigger_id, seconds.max(1), events, cancel).await
        }
        TemporalSchedule::Cron { expression } => {
            cron_schedule(trigger_id, &expression, events, cancel).await
        }
        TemporalSchedule::Once { at_ms } => once(trigger_id, at_ms, events, cancel).await,
    }
}

/// Fixed interval with no drift: each deadline is computed from the
/// previous deadline, not from when the fire was delivered.
async fn interval(
    trigger_id: TriggerId,
    seconds: u64,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let period = Duration::from_secs(seconds);
    let mut next = Instant::now() + period;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep_until(next) => {
                next += period;
                send_fire(trigger_id, json!({"schedule": "interval", "seconds": seconds}), events)
                    .await?;
            }
        }
    }
}

/// Compute the next fire time from the cron schedule, sleep, re-compute.
async fn cron_schedule(
    trigger_id: TriggerId,
    expression: &str,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let schedule = cron::Schedule::from_str(expression)
        .map_err(|_| WatcherError::InvalidSchedule(expression.to_string()))?;
    loop {
        let next = match schedule.upcoming(chrono::Utc).next() {
            Some(t) => t,
            None => return Ok(()),
        };
        let wait = (next - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(wait) => {
                send_fire(
                    trigger_id,
                    json!({"schedule": "cron", "expression": expression, "at": next.to_rfc3339()}),
                    events,
                )
                .await?;
            }
        }
    }
}

/// Sleep until the absolute timestamp, fire once, exit.
async fn once(
    trigger_id: TriggerId,
    at_ms: u64,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let wait = Duration::from_millis(at_ms.saturating_sub(epoch_ms()));
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        _ = tokio::time::sleep(wait) => {
            send_fire(trigger_id, json!({"schedule": "once", "at_ms": at_ms}), events).await
        }
    }
}
