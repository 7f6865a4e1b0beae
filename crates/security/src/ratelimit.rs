// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sliding-window rate limiting per (identity, action).

use iml_core::Clock;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Raised when a window is exhausted; maps to
/// `rejection_details.source = "rate_limiter"` at the plan level.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("rate limit exceeded for {identity}/{action}: {limit} per {window_secs}s")]
pub struct RateLimited {
    pub identity: String,
    pub action: String,
    pub limit: u32,
    pub window_secs: u64,
}

/// Sliding-window limiter keyed by (identity, action).
///
/// Windows are tracked at millisecond resolution and pruned on every check,
/// so the structure stays bounded by `limit` entries per key.
pub struct ActionRateLimiter<C: Clock> {
    windows: Mutex<HashMap<(String, String), VecDeque<u64>>>,
    limit: u32,
    window_secs: u64,
    clock: C,
}

impl<C: Clock> ActionRateLimiter<C> {
    pub fn new(limit: u32, window_secs: u64, clock: C) -> Self {
        Self { windows: Mutex::new(HashMap::new()), limit, window_secs, clock }
    }

    /// Record one occurrence, failing if the window is already full.
    pub fn check(&self, identity: &str, action: &str) -> Result<(), RateLimited> {
        let now = self.clock.epoch_ms();
        let floor = now.saturating_sub(self.window_secs * 1_000);

        let mut windows = self.windows.lock();
        let window = windows
            .entry((identity.to_string(), action.to_string()))
            .or_default();
        while window.front().is_some_and(|&t| t < floor) {
            window.pop_front();
        }

        if window.len() as u32 >= self.limit {
            return Err(RateLimited {
                identity: identity.to_string(),
                action: action.to_string(),
                limit: self.limit,
                window_secs: self.window_secs,
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Occurrences currently inside the window for a key.
    pub fn current(&self, identity: &str, action: &str) -> usize {
        let floor = self.clock.epoch_ms().saturating_sub(self.window_secs * 1_000);
        let windows = self.windows.lock();
        windows
            .get(&(identity.to_string(), action.to_string()))
            .map(|w| w.iter().filter(|&&t| t >= floor).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "ratelimit_tests.rs"]
mod tests;
