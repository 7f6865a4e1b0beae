// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin adapter around an external ML classifier endpoint.
//!
//! The adapter fails open with visibility: a timeout or transport error
//! never rejects a plan, it downgrades to WARN with a finding saying the
//! classifier was unavailable.

use crate::scanner::{Finding, Scanner, ScannerResult, Verdict};
use async_trait::async_trait;
use iml_core::Plan;
use serde::Deserialize;
use std::time::Duration;

/// Wire shape expected from the classifier.
#[derive(Debug, Deserialize)]
struct MlResponse {
    verdict: String,
    #[serde(default)]
    risk_score: f64,
    #[serde(default)]
    findings: Vec<String>,
}

/// HTTP adapter for one external classifier.
pub struct MlScannerAdapter {
    name: String,
    endpoint: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl MlScannerAdapter {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn unavailable(&self, reason: &str) -> ScannerResult {
        ScannerResult::warn(
            0.0,
            vec![Finding::new(&self.name, format!("classifier unavailable: {reason}"))],
        )
    }

    async fn classify(&self, plan: &Plan) -> Result<MlResponse, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(plan)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        response.json::<MlResponse>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Scanner for MlScannerAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, plan: &Plan) -> ScannerResult {
        let response = match self.classify(plan).await {
            Ok(r) => r,
            Err(reason) => {
                tracing::warn!(scanner = %self.name, %reason, "ml classifier call failed");
                return self.unavailable(&reason);
            }
        };

        let verdict = match response.verdict.as_str() {
            "pass" => Verdict::Pass,
            "warn" => Verdict::Warn,
            "reject" => Verdict::Reject,
            other => {
                tracing::warn!(scanner = %self.name, verdict = other, "unknown classifier verdict");
                return self.unavailable(&format!("unknown verdict {other:?}"));
            }
        };

        let findings = response
            .findings
            .into_iter()
            .map(|message| Finding::new(&self.name, message))
            .collect();
        ScannerResult {
            verdict,
            risk_score: response.risk_score.clamp(0.0, 1.0),
            findings,
            clarification_needed: false,
        }
    }
}

#[cfg(test)]
#[path = "ml_tests.rs"]
mod tests;
