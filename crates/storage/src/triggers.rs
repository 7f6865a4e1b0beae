// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trigger persistence.
//!
//! The trigger store is the sole authoritative source for trigger state:
//! the `state` and `enabled` columns win over whatever the serialised
//! definition JSON claims. The trigger daemon enforces that precedence when
//! it rehydrates definitions; this layer just keeps both faithfully.

use crate::StorageError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::Path;

/// One persisted trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRow {
    pub trigger_id: String,
    pub name: String,
    /// Authoritative lifecycle state.
    pub state: String,
    pub enabled: bool,
    /// Full serialised definition; `state`/`enabled` inside it are advisory.
    pub definition: Value,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub expires_at_ms: Option<u64>,
}

/// Embedded store for trigger definitions.
pub struct TriggerStore {
    conn: Mutex<Connection>,
}

impl TriggerStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS triggers (
                trigger_id TEXT PRIMARY KEY,
                name       TEXT NOT NULL,
                state      TEXT NOT NULL,
                enabled    INTEGER NOT NULL,
                definition TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_triggers_state ON triggers(state);
            CREATE INDEX IF NOT EXISTS idx_triggers_enabled ON triggers(enabled);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn row_from(row: &Row<'_>) -> rusqlite::Result<TriggerRow> {
        let definition: String = row.get(4)?;
        Ok(TriggerRow {
            trigger_id: row.get(0)?,
            name: row.get(1)?,
            state: row.get(2)?,
            enabled: row.get::<_, i64>(3)? != 0,
            definition: serde_json::from_str(&definition).unwrap_or(Value::Null),
            created_at_ms: row.get::<_, i64>(5)? as u64,
            updated_at_ms: row.get::<_, i64>(6)? as u64,
            expires_at_ms: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        })
    }

    const SELECT: &'static str = "SELECT trigger_id, name, state, enabled, definition, \
                                  created_at, updated_at, expires_at FROM triggers";

    /// Insert or replace a trigger row.
    pub fn save(&self, row: &TriggerRow) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO triggers
                 (trigger_id, name, state, enabled, definition, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(trigger_id) DO UPDATE SET
                 name = excluded.name,
                 state = excluded.state,
                 enabled = excluded.enabled,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at,
                 expires_at = excluded.expires_at",
            params![
                row.trigger_id,
                row.name,
                row.state,
                row.enabled as i64,
                serde_json::to_string(&row.definition)?,
                row.created_at_ms as i64,
                row.updated_at_ms as i64,
                row.expires_at_ms.map(|v| v as i64),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, trigger_id: &str) -> Result<Option<TriggerRow>, StorageError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("{} WHERE trigger_id = ?1", Self::SELECT),
                params![trigger_id],
                Self::row_from,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list(&self) -> Result<Vec<TriggerRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{} ORDER BY created_at", Self::SELECT))?;
        let rows = stmt.query_map([], Self::row_from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_enabled(&self) -> Result<Vec<TriggerRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!("{} WHERE enabled = 1 ORDER BY created_at", Self::SELECT))?;
        let rows = stmt.query_map([], Self::row_from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Update only the authoritative state column.
    pub fn set_state(&self, trigger_id: &str, state: &str, now_ms: u64) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE triggers SET state = ?2, updated_at = ?3 WHERE trigger_id = ?1",
            params![trigger_id, state, now_ms as i64],
        )?;
        Ok(())
    }

    pub fn set_enabled(
        &self,
        trigger_id: &str,
        enabled: bool,
        now_ms: u64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE triggers SET enabled = ?2, updated_at = ?3 WHERE trigger_id = ?1",
            params![trigger_id, enabled as i64, now_ms as i64],
        )?;
        Ok(())
    }

    pub fn delete(&self, trigger_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM triggers WHERE trigger_id = ?1", params![trigger_id])?;
        Ok(n > 0)
    }

    /// Remove triggers whose `expires_at` has passed. Returns removed ids.
    pub fn purge_expired(&self, now_ms: u64) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT trigger_id FROM triggers WHERE expires_at IS NOT NULL AND expires_at < ?1",
        )?;
        let rows = stmt.query_map(params![now_ms as i64], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        drop(stmt);
        for id in &ids {
            conn.execute("DELETE FROM triggers WHERE trigger_id = ?1", params![id])?;
        }
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "triggers_tests.rs"]
mod tests;
