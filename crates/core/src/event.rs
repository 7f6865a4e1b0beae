// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Universal event envelope with causal linkage.
//!
//! Every observable fact in the daemon is one of these. Events are immutable
//! once emitted; the only sanctioned mutation is [`UniversalEvent::spawn_child`]
//! appending the child's id to the parent's `causes` list before the parent
//! is published.

use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for an emitted event.
    pub struct EventId("evt-");
}

/// Delivery priority attached to an event envelope.
///
/// Ordering follows urgency: `Critical` sorts before `Background`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

crate::simple_display! {
    EventPriority {
        Critical => "critical",
        High => "high",
        Normal => "normal",
        Low => "low",
        Background => "background",
    }
}

/// Typed event envelope routed by topic.
///
/// Topics are dot-separated segments (`plan.action.completed`); `/` is
/// accepted on input and normalised to `.` by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: String,
    pub topic: String,
    pub timestamp_ms: u64,
    /// Component that emitted the event (e.g. "executor", "trigger_daemon").
    pub source: String,
    #[serde(default)]
    pub payload: Value,
    /// Parent event; absent only for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<EventId>,
    /// Children spawned from this event, appended by [`Self::spawn_child`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub priority: EventPriority,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl UniversalEvent {
    /// Create a root event.
    pub fn new(
        kind: impl Into<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        payload: Value,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id: EventId::new(),
            kind: kind.into(),
            topic: topic.into(),
            timestamp_ms,
            source: source.into(),
            payload,
            caused_by: None,
            causes: Vec::new(),
            session_id: None,
            correlation_id: None,
            priority: EventPriority::Normal,
            metadata: HashMap::new(),
        }
    }

    /// Create a child event causally linked to `self`.
    ///
    /// The child inherits source, session, correlation, and priority; its id
    /// is appended to this event's `causes` list.
    pub fn spawn_child(
        &mut self,
        kind: impl Into<String>,
        topic: impl Into<String>,
        payload: Value,
        timestamp_ms: u64,
    ) -> UniversalEvent {
        let child = UniversalEvent {
            id: EventId::new(),
            kind: kind.into(),
            topic: topic.into(),
            timestamp_ms,
            source: self.source.clone(),
            payload,
            caused_by: Some(self.id),
            causes: Vec::new(),
            session_id: self.session_id,
            correlation_id: self.correlation_id.clone(),
            priority: self.priority,
            metadata: HashMap::new(),
        };
        self.causes.push(child.id);
        child
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
