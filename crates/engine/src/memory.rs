// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-memory adapter between the state store and the template resolver.

use iml_core::SessionId;
use iml_plan::MemoryReader;
use iml_storage::StateStore;
use serde_json::Value;
use std::sync::Arc;

/// Read/write view of one session's KV memory.
pub struct SessionMemory {
    store: Arc<StateStore>,
    session_id: Option<SessionId>,
}

impl SessionMemory {
    pub fn new(store: Arc<StateStore>, session_id: Option<SessionId>) -> Self {
        Self { store, session_id }
    }

    fn session_key(&self) -> &str {
        self.session_id.as_ref().map(|s| s.as_str()).unwrap_or("")
    }

    /// Write a key; plans outside a session share the anonymous scope.
    pub fn write(&self, key: &str, value: &Value, now_ms: u64) {
        if let Err(e) = self.store.set_memory(self.session_key(), key, value, now_ms) {
            tracing::error!(key, error = %e, "memory write failed");
        }
    }
}

impl MemoryReader for SessionMemory {
    fn get(&self, key: &str) -> Option<Value> {
        match self.store.get_memory(self.session_key(), key) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key, error = %e, "memory read failed");
                None
            }
        }
    }
}
