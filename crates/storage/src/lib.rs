// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! iml-storage: durable state behind the execution nucleus.
//!
//! Two embedded SQLite stores: the state store (plans, per-action records,
//! session memory) and the trigger store. Connections are serialised behind
//! a mutex; SQLite itself provides the durability guarantees.

mod store;
mod triggers;

pub use store::StateStore;
pub use triggers::{TriggerRow, TriggerStore};

use thiserror::Error;

/// Storage-layer failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
