// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scanner contract shared by every admission tier.

use async_trait::async_trait;
use iml_core::{Plan, RejectionSource};
use serde::{Deserialize, Serialize};

/// Admission verdict, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// Logged and allowed.
    Warn,
    /// Terminal for the plan.
    Reject,
}

iml_core::simple_display! {
    Verdict {
        Pass => "pass",
        Warn => "warn",
        Reject => "reject",
    }
}

/// Threat taxonomy shared by scanners and the intent verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    CommandInjection,
    PromptInjection,
    DataExfiltration,
    DestructiveOperation,
    PrivilegeEscalation,
    Persistence,
    ResourceAbuse,
    PolicyViolation,
}

iml_core::simple_display! {
    ThreatType {
        CommandInjection => "command_injection",
        PromptInjection => "prompt_injection",
        DataExfiltration => "data_exfiltration",
        DestructiveOperation => "destructive_operation",
        PrivilegeEscalation => "privilege_escalation",
        Persistence => "persistence",
        ResourceAbuse => "resource_abuse",
        PolicyViolation => "policy_violation",
    }
}

/// One observation a scanner wants surfaced to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Scanner that produced the finding.
    pub scanner: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_type: Option<ThreatType>,
    /// Action id the finding is anchored to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

impl Finding {
    pub fn new(scanner: impl Into<String>, message: impl Into<String>) -> Self {
        Self { scanner: scanner.into(), message: message.into(), threat_type: None, action_id: None }
    }

    pub fn threat(mut self, threat: ThreatType) -> Self {
        self.threat_type = Some(threat);
        self
    }

    pub fn action(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn maybe_action(mut self, action_id: Option<&str>) -> Self {
        self.action_id = action_id.map(str::to_string);
        self
    }
}

/// Outcome of one scanner over one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerResult {
    pub verdict: Verdict,
    /// Risk in `[0, 1]`.
    pub risk_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    /// Set when the verifier wants the model to clarify intent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub clarification_needed: bool,
}

impl ScannerResult {
    pub fn pass() -> Self {
        Self { verdict: Verdict::Pass, risk_score: 0.0, findings: Vec::new(), clarification_needed: false }
    }

    pub fn warn(risk_score: f64, findings: Vec<Finding>) -> Self {
        Self { verdict: Verdict::Warn, risk_score, findings, clarification_needed: false }
    }

    pub fn reject(risk_score: f64, findings: Vec<Finding>) -> Self {
        Self { verdict: Verdict::Reject, risk_score, findings, clarification_needed: false }
    }
}

/// A pre-execution admission check.
///
/// Scanners must be pure with respect to the plan: scanning the same plan
/// twice yields the same result, and scanning never mutates shared state.
#[async_trait]
pub trait Scanner: Send + Sync {
    fn name(&self) -> &str;

    /// Which `rejection_details.source` a REJECT from this scanner maps to.
    fn rejection_source(&self) -> RejectionSource {
        RejectionSource::ScannerPipeline
    }

    async fn scan(&self, plan: &Plan) -> ScannerResult;
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
