// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus with MQTT-style topic-pattern routing.
//!
//! The in-process backend fans out synchronously, best-effort: a slow or
//! dropped subscriber never blocks the publisher. Delivery order within one
//! subscriber is FIFO; across subscribers it is unordered. Durable or
//! distributed backends plug in behind the same [`EventBus`] trait.

use crate::event::UniversalEvent;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default capacity of the recent-event ring buffer.
const RECENT_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("empty topic pattern")]
    Empty,
    #[error("'#' is only valid as the final segment: {0}")]
    HashNotTerminal(String),
    #[error("invalid segment {segment:?} in pattern {pattern:?}")]
    InvalidSegment { pattern: String, segment: String },
}

/// Compiled topic pattern.
///
/// `*` matches exactly one segment; a trailing `#` matches zero or more.
/// `/` separators are normalised to `.` before compilation, so
/// `plan/+/completed`-style inputs from external transports route the same
/// as dotted topics.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    source: String,
    regex: Regex,
}

impl TopicPattern {
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let normalised = pattern.replace('/', ".");
        if normalised.is_empty() {
            return Err(PatternError::Empty);
        }

        let segments: Vec<&str> = normalised.split('.').collect();
        let last = segments.len() - 1;
        let mut parts: Vec<String> = Vec::new();
        let mut tail_hash = false;
        for (i, segment) in segments.iter().enumerate() {
            match *segment {
                "#" => {
                    if i != last {
                        return Err(PatternError::HashNotTerminal(pattern.to_string()));
                    }
                    tail_hash = true;
                }
                "*" => parts.push("[^.]+".to_string()),
                seg => {
                    if seg.is_empty() || seg.contains(['#', '*']) {
                        return Err(PatternError::InvalidSegment {
                            pattern: pattern.to_string(),
                            segment: seg.to_string(),
                        });
                    }
                    parts.push(regex::escape(seg));
                }
            }
        }

        let mut regex_src = format!("^{}", parts.join(r"\."));
        if tail_hash {
            if parts.is_empty() {
                // Bare "#" matches every topic.
                regex_src.push_str(".+");
            } else {
                // Trailing '#' also matches the empty remainder, so
                // "plan.#" matches "plan" itself.
                regex_src.push_str(r"(\..+)?");
            }
        }
        regex_src.push('$');

        let regex = Regex::new(&regex_src).map_err(|_| PatternError::InvalidSegment {
            pattern: pattern.to_string(),
            segment: regex_src.clone(),
        })?;
        Ok(Self { source: pattern.to_string(), regex })
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(&topic.replace('/', "."))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Receiving half of a subscription.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<UniversalEvent>,
}

impl EventStream {
    /// Await the next matching event. `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<UniversalEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll for a matching event.
    pub fn try_recv(&mut self) -> Option<UniversalEvent> {
        self.rx.try_recv().ok()
    }
}

/// Pub/sub contract shared by all bus backends.
pub trait EventBus: Send + Sync {
    /// Publish an event to all matching subscribers. Never blocks.
    fn publish(&self, event: UniversalEvent);

    /// Subscribe to a topic pattern.
    fn subscribe(&self, pattern: &str) -> Result<EventStream, PatternError>;

    /// Most recent events, oldest first, up to `limit`.
    fn recent(&self, limit: usize) -> Vec<UniversalEvent>;
}

struct Subscriber {
    pattern: TopicPattern,
    tx: mpsc::UnboundedSender<UniversalEvent>,
}

/// In-process fan-out backend.
pub struct InProcessBus {
    subscribers: Mutex<Vec<Subscriber>>,
    recent: Mutex<VecDeque<UniversalEvent>>,
    recent_capacity: usize,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            recent_capacity: RECENT_CAPACITY,
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InProcessBus {
    fn publish(&self, event: UniversalEvent) {
        {
            let mut recent = self.recent.lock();
            if recent.len() == self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        let mut subscribers = self.subscribers.lock();
        // Dead receivers are pruned on publish rather than on drop.
        subscribers.retain(|sub| {
            if !sub.pattern.matches(&event.topic) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(event.clone()).is_ok()
        });

        tracing::trace!(topic = %event.topic, kind = %event.kind, id = %event.id, "published");
    }

    fn subscribe(&self, pattern: &str) -> Result<EventStream, PatternError> {
        let pattern = TopicPattern::compile(pattern)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(Subscriber { pattern, tx });
        Ok(EventStream { rx })
    }

    fn recent(&self, limit: usize) -> Vec<UniversalEvent> {
        let recent = self.recent.lock();
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
