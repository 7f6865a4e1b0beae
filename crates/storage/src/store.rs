// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan, action, and session-memory persistence.

use crate::StorageError;
use iml_core::{ExecutionState, PlanId, PlanStatus};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

/// Durable per-plan and per-action state.
///
/// The `plans.data` column round-trips the full [`ExecutionState`] verbatim,
/// `rejection_details` included; the scalar columns exist for indexing and
/// recovery scans. Per-action rows mirror `data` for SQL-side inspection.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (creating if needed) the state database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plans (
                plan_id    TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                data       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(status);
            CREATE TABLE IF NOT EXISTS actions (
                plan_id    TEXT NOT NULL,
                action_id  TEXT NOT NULL,
                state      TEXT NOT NULL,
                started_at INTEGER,
                ended_at   INTEGER,
                result     TEXT,
                PRIMARY KEY (plan_id, action_id)
            );
            CREATE TABLE IF NOT EXISTS memory (
                session_id TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (session_id, key)
            );",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Upsert the full execution state for a plan.
    pub fn save_plan(&self, state: &ExecutionState, updated_at_ms: u64) -> Result<(), StorageError> {
        let data = serde_json::to_string(state)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO plans (plan_id, status, created_at, updated_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(plan_id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at,
                 data = excluded.data",
            params![
                state.plan_id.as_str(),
                state.status.to_string(),
                state.created_at_ms as i64,
                updated_at_ms as i64,
                data,
            ],
        )?;
        for (action_id, record) in &state.actions {
            let result = match &record.result {
                Some(value) => Some(serde_json::to_string(value)?),
                None => None,
            };
            conn.execute(
                "INSERT INTO actions (plan_id, action_id, state, started_at, ended_at, result)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(plan_id, action_id) DO UPDATE SET
                     state = excluded.state,
                     started_at = excluded.started_at,
                     ended_at = excluded.ended_at,
                     result = excluded.result",
                params![
                    state.plan_id.as_str(),
                    action_id,
                    record.state.to_string(),
                    record.started_at_ms.map(|v| v as i64),
                    record.ended_at_ms.map(|v| v as i64),
                    result,
                ],
            )?;
        }
        Ok(())
    }

    /// Load a plan's execution state.
    pub fn get_plan(&self, plan_id: &PlanId) -> Result<Option<ExecutionState>, StorageError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM plans WHERE plan_id = ?1",
                params![plan_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Most recently updated plans, newest first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ExecutionState>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT data FROM plans ORDER BY updated_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Fail any plan left Queued/Running by a previous process.
    ///
    /// Called once at startup; a daemon crash must not leave plans that look
    /// alive forever. Returns the ids that were marked.
    pub fn mark_interrupted(&self, now_ms: u64) -> Result<Vec<PlanId>, StorageError> {
        let pending: Vec<(String, String)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT plan_id, data FROM plans WHERE status IN ('queued', 'running')",
            )?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut marked = Vec::new();
        for (id, data) in pending {
            let mut state: ExecutionState = serde_json::from_str(&data)?;
            state.status = PlanStatus::Failed;
            state.ended_at_ms = Some(now_ms);
            for record in state.actions.values_mut() {
                if !record.state.is_terminal() {
                    record.state = iml_core::ActionState::Skipped;
                    record.ended_at_ms = Some(now_ms);
                    record.error
                        .get_or_insert_with(|| "daemon restarted mid-execution".to_string());
                }
            }
            self.save_plan(&state, now_ms)?;
            tracing::warn!(plan_id = %id, "marked interrupted plan as failed");
            marked.push(PlanId::from_string(&id));
        }
        Ok(marked)
    }

    /// Write a session-memory key.
    pub fn set_memory(
        &self,
        session_id: &str,
        key: &str,
        value: &Value,
        now_ms: u64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO memory (session_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            params![session_id, key, serde_json::to_string(value)?, now_ms as i64],
        )?;
        Ok(())
    }

    /// Read a session-memory key.
    pub fn get_memory(&self, session_id: &str, key: &str) -> Result<Option<Value>, StorageError> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT value FROM memory WHERE session_id = ?1 AND key = ?2",
                params![session_id, key],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(t) => Ok(Some(serde_json::from_str(&t)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
