// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite condition evaluation.
//!
//! Sub-conditions run as ordinary watchers reporting into an internal
//! channel under synthetic child ids (`<trigger>#<index>`); this task holds
//! the partial-match state and decides when the composite as a whole fires.

use super::{send_fire, spawn_watcher, WatcherError, WatcherEvent, WatcherHandle};
use crate::condition::{CompositeOp, TriggerCondition};
use crate::definition::TriggerId;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(super) struct CompositeParams {
    pub op: CompositeOp,
    pub conditions: Vec<TriggerCondition>,
    pub timeout_seconds: u64,
    pub silence_seconds: u64,
    pub count: u32,
    pub window_seconds: u64,
}

fn child_id(parent: TriggerId, index: usize) -> TriggerId {
    TriggerId::from_string(format!("{}#{}", parent, index))
}

fn child_index(parent: TriggerId, child: &TriggerId) -> Option<usize> {
    child
        .as_str()
        .strip_prefix(parent.as_str())?
        .strip_prefix('#')?
        .parse()
        .ok()
}

/// Sleep until an optional deadline; pends forever when there is none.
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

pub(super) async fn watch(
    trigger_id: TriggerId,
    params: CompositeParams,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    let total = params.conditions.len();
    let (sub_tx, mut sub_rx) = mpsc::channel::<WatcherEvent>(64);
    let handles: Vec<WatcherHandle> = params
        .conditions
        .into_iter()
        .enumerate()
        .map(|(i, condition)| spawn_watcher(child_id(trigger_id, i), condition, sub_tx.clone()))
        .collect();

    let result = run(
        trigger_id,
        params.op,
        total,
        Duration::from_secs(params.timeout_seconds.max(1)),
        Duration::from_secs(params.silence_seconds.max(1)),
        params.count.max(1) as usize,
        Duration::from_secs(params.window_seconds.max(1)),
        &mut sub_rx,
        events,
        cancel,
    )
    .await;

    for handle in handles {
        handle.abort();
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn run(
    trigger_id: TriggerId,
    op: CompositeOp,
    total: usize,
    timeout: Duration,
    silence: Duration,
    count: usize,
    window: Duration,
    sub_rx: &mut mpsc::Receiver<WatcherEvent>,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    // Partial-match state; which pieces are live depends on the operator.
    let mut seen: HashSet<usize> = HashSet::new();
    let mut sequence_next = 0usize;
    let mut match_started: Option<Instant> = None;
    let mut silence_deadline = Instant::now() + silence;
    let mut window_fires: VecDeque<Instant> = VecDeque::new();

    loop {
        let deadline = match op {
            CompositeOp::Not => Some(silence_deadline),
            CompositeOp::And | CompositeOp::Seq => match_started.map(|s| s + timeout),
            _ => None,
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            _ = until(deadline) => match op {
                CompositeOp::Not => {
                    // Every sub-trigger stayed silent for the full window.
                    send_fire(trigger_id, json!({"op": "not", "silent_seconds": silence.as_secs()}), events).await?;
                    silence_deadline = Instant::now() + silence;
                }
                _ => {
                    // Partial match expired.
                    seen.clear();
                    sequence_next = 0;
                    match_started = None;
                }
            },

            event = sub_rx.recv() => {
                let event = match event {
                    Some(e) => e,
                    None => return Err(WatcherError::Closed),
                };
                let fire = match event {
                    WatcherEvent::Fired(f) => f,
                    WatcherEvent::Failed { error, .. } => {
                        return Err(WatcherError::Metrics(error));
                    }
                };
                let Some(index) = child_index(trigger_id, &fire.trigger_id) else { continue };

                match op {
                    CompositeOp::Or => {
                        send_fire(trigger_id, json!({"op": "or", "matched": index}), events).await?;
                    }
                    CompositeOp::Not => {
                        // Activity resets the silence clock.
                        silence_deadline = Instant::now() + silence;
                    }
                    CompositeOp::And => {
                        match_started.get_or_insert_with(Instant::now);
                        seen.insert(index);
                        if seen.len() == total {
                            send_fire(trigger_id, json!({"op": "and", "matched": total}), events).await?;
                            seen.clear();
                            match_started = None;
                        }
                    }
                    CompositeOp::Seq => {
                        if index == sequence_next {
                            match_started.get_or_insert_with(Instant::now);
                            sequence_next += 1;
                            if sequence_next == total {
                                send_fire(trigger_id, json!({"op": "seq", "length": total}), events).await?;
                                sequence_next = 0;
                                match_started = None;
                            }
                        } else {
                            // Out-of-order firing restarts the sequence.
                            sequence_next = usize::from(index == 0);
                            match_started =
                                if index == 0 { Some(Instant::now()) } else { None };
                        }
                    }
                    CompositeOp::Window => {
                        let now = Instant::now();
                        window_fires.push_back(now);
                        while window_fires.front().is_some_and(|&t| now - t > window) {
                            window_fires.pop_front();
                        }
                        if window_fires.len() >= count {
                            send_fire(
                                trigger_id,
                                json!({"op": "window", "fires": window_fires.len()}),
                                events,
                            )
                            .await?;
                            // One fire per window, then re-arm fresh.
                            window_fires.clear();
                        }
                    }
                }
            }
        }
    }
}
