// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output sanitiser for model-bound action results.
//!
//! Everything a module returns eventually lands in a model prompt, so the
//! executor routes results through here: Unicode is normalised, recognised
//! prompt-injection motifs are neutralised, and oversized output is
//! truncated with a marker.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Replacement for a neutralised motif.
const NEUTRALISED: &str = "[filtered]";

/// Marker appended when output is cut at the byte cap.
const TRUNCATION_MARKER: &str = "…[truncated]";

/// Default byte cap for a single sanitised string.
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024;

/// Injection motifs neutralised in module output before it reaches the
/// model: instruction overrides, role switches, and fenced instruction
/// sentinels.
// Allow expect here as the regexes are compile-time verified to be valid
#[allow(clippy::expect_used)]
static INJECTION_MOTIFS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)ignore (all )?(previous|prior) instructions",
        r"(?i)disregard (all )?(previous|prior) (instructions|context)",
        r"(?i)you are now (an?|in) [^.\n]{0,60}",
        r"(?i)</?(system|assistant|developer)>",
        r"(?i)^\s*(system|assistant)\s*:",
        r"(?i)```\s*(system|instructions)\b",
        r"(?i)\[\s*(system|instructions)\s*\]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("constant regex pattern is valid"))
    .collect()
});

/// Scrubs action output bound for the model.
#[derive(Debug, Clone)]
pub struct OutputSanitizer {
    max_bytes: usize,
}

impl OutputSanitizer {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Sanitise every string leaf of a result document.
    pub fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_text(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), self.sanitize_value(v))).collect(),
            ),
            other => other.clone(),
        }
    }

    /// Normalise, neutralise, truncate.
    pub fn sanitize_text(&self, raw: &str) -> String {
        let mut text: String = raw.nfkc().collect();
        for motif in INJECTION_MOTIFS.iter() {
            if motif.is_match(&text) {
                text = motif.replace_all(&text, NEUTRALISED).into_owned();
            }
        }
        self.truncate(text)
    }

    fn truncate(&self, text: String) -> String {
        if text.len() <= self.max_bytes {
            return text;
        }
        // Cut on a char boundary at or below the cap.
        let mut cut = self.max_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut out = text[..cut].to_string();
        out.push_str(TRUNCATION_MARKER);
        out
    }
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

#[cfg(test)]
#[path = "sanitizer_tests.rs"]
mod tests;
