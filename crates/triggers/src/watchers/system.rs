// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process and resource polling over `sysinfo`.

use super::{send_fire, WatcherError, WatcherEvent};
use crate::condition::{ProcessEventKind, ResourceMetric};
use crate::definition::TriggerId;
use serde_json::json;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Poll the process list and fire on started/stopped transitions of the
/// named process.
pub(super) async fn watch_process(
    trigger_id: TriggerId,
    process_name: String,
    event: ProcessEventKind,
    poll_interval_seconds: u64,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let period = Duration::from_secs(poll_interval_seconds.max(1));
    let mut sys = System::new();
    sys.refresh_processes();
    let mut was_running = process_running(&sys, &process_name);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(period) => {
                sys.refresh_processes();
                let is_running = process_running(&sys, &process_name);
                let transition = match event {
                    ProcessEventKind::Started => !was_running && is_running,
                    ProcessEventKind::Stopped => was_running && !is_running,
                };
                if transition {
                    send_fire(
                        trigger_id,
                        json!({"process": process_name, "event": event}),
                        events,
                    )
                    .await?;
                }
                was_running = is_running;
            }
        }
    }
}

fn process_running(sys: &System, name: &str) -> bool {
    sys.processes().values().any(|p| p.name() == name)
}

/// Poll a metric and fire when it holds above the threshold continuously
/// for the configured duration; one fire per excursion.
pub(super) async fn watch_resource(
    trigger_id: TriggerId,
    metric: ResourceMetric,
    threshold_percent: f64,
    duration_seconds: u64,
    poll_interval_seconds: u64,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let period = Duration::from_secs(poll_interval_seconds.max(1));
    let hold = Duration::from_secs(duration_seconds);
    let mut sys = System::new();
    let mut breach_started: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(period) => {
                let reading = sample(&mut sys, metric);
                if reading >= threshold_percent {
                    let started = breach_started.get_or_insert_with(tokio::time::Instant::now);
                    if started.elapsed() >= hold {
                        send_fire(
                            trigger_id,
                            json!({
                                "metric": metric,
                                "reading_percent": reading,
                                "threshold_percent": threshold_percent,
                            }),
                            events,
                        )
                        .await?;
                        breach_started = None;
                    }
                } else {
                    breach_started = None;
                }
            }
        }
    }
}

fn sample(sys: &mut System, metric: ResourceMetric) -> f64 {
    match metric {
        ResourceMetric::CpuPercent => {
            sys.refresh_cpu();
            sys.global_cpu_info().cpu_usage() as f64
        }
        ResourceMetric::MemoryPercent => {
            sys.refresh_memory();
            let total = sys.total_memory();
            if total == 0 {
                0.0
            } else {
                sys.used_memory() as f64 / total as f64 * 100.0
            }
        }
        ResourceMetric::DiskPercent => {
            let disks = sysinfo::Disks::new_with_refreshed_list();
            let (mut total, mut available) = (0u64, 0u64);
            for disk in disks.list() {
                total += disk.total_space();
                available += disk.available_space();
            }
            if total == 0 {
                0.0
            } else {
                (total - available) as f64 / total as f64 * 100.0
            }
        }
    }
}
