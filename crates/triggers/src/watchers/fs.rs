// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem watcher over `notify`.

use super::{send_fire, WatcherError, WatcherEvent};
use crate::condition::FsEventKind;
use crate::definition::TriggerId;
use notify::{RecursiveMode, Watcher};
use serde_json::json;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn classify(kind: &notify::EventKind) -> Option<FsEventKind> {
    match kind {
        notify::EventKind::Create(_) => Some(FsEventKind::Created),
        notify::EventKind::Modify(_) => Some(FsEventKind::Modified),
        notify::EventKind::Remove(_) => Some(FsEventKind::Deleted),
        _ => None,
    }
}

pub(super) async fn watch(
    trigger_id: TriggerId,
    path: PathBuf,
    recursive: bool,
    kinds: Vec<FsEventKind>,
    events: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> Result<(), WatcherError> {
    // notify delivers on its own thread; bridge into the async world
    // through an unbounded channel (send is non-blocking there).
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Event>();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        if let Ok(event) = result {
            let _ = raw_tx.send(event);
        }
    })
    .map_err(|e| WatcherError::Notify(e.to_string()))?;

    let mode = if recursive { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
    watcher.watch(&path, mode).map_err(|e| WatcherError::Notify(e.to_string()))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = raw_rx.recv() => {
                let event = match event {
                    Some(e) => e,
                    None => return Err(WatcherError::Notify("watch thread exited".to_string())),
                };
                let Some(kind) = classify(&event.kind) else { continue };
                if !kinds.contains(&kind) {
                    continue;
                }
                let paths: Vec<String> =
                    event.paths.iter().map(|p| p.display().to_string()).collect();
                send_fire(
                    trigger_id,
                    json!({"fs_event": kind, "paths": paths}),
                    events,
                )
                .await?;
            }
        }
    }
}
