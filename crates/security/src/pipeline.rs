// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered scanner chain with aggregate verdict.

use crate::scanner::{Finding, Scanner, ScannerResult, Verdict};
use iml_core::{Plan, RejectionDetails, RejectionSource};
use std::sync::Arc;

/// Aggregate outcome of one pipeline pass over one plan.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub verdict: Verdict,
    pub risk_score: f64,
    pub findings: Vec<Finding>,
    pub clarification_needed: bool,
    /// Scanner whose REJECT terminated the pass, if any.
    pub rejected_by: Option<String>,
    /// Source attribution for `rejection_details`.
    pub source: RejectionSource,
}

impl PipelineReport {
    pub fn is_rejected(&self) -> bool {
        self.verdict == Verdict::Reject
    }

    /// Convert a rejecting report into the structured diagnosis surfaced to
    /// the model.
    pub fn to_rejection_details(&self) -> RejectionDetails {
        let mut threat_types: Vec<String> = Vec::new();
        for finding in &self.findings {
            if let Some(threat) = finding.threat_type {
                let label = threat.to_string();
                if !threat_types.contains(&label) {
                    threat_types.push(label);
                }
            }
        }
        let recommendations = self
            .findings
            .iter()
            .map(|f| format!("[{}] {}", f.scanner, f.message))
            .collect();
        RejectionDetails {
            source: self.source,
            verdict: self.verdict.to_string(),
            risk_score: self.risk_score,
            threat_types,
            scanner_findings: self
                .findings
                .iter()
                .filter_map(|f| serde_json::to_value(f).ok())
                .collect(),
            recommendations,
            clarification_needed: self.clarification_needed,
        }
    }
}

/// Ordered chain of scanners producing an aggregate verdict.
///
/// The fold is pure: verdict and risk are the maxima observed, findings
/// concatenate in scanner order, and the scanner order is fixed at
/// construction so repeated passes over the same plan agree.
#[derive(Clone, Default)]
pub struct SecurityPipeline {
    scanners: Vec<Arc<dyn Scanner>>,
}

impl SecurityPipeline {
    pub fn new(scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self { scanners }
    }

    pub fn push(&mut self, scanner: Arc<dyn Scanner>) {
        self.scanners.push(scanner);
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }

    /// Run every scanner in order; a REJECT short-circuits the rest.
    pub async fn scan(&self, plan: &Plan) -> PipelineReport {
        let mut report = PipelineReport {
            verdict: Verdict::Pass,
            risk_score: 0.0,
            findings: Vec::new(),
            clarification_needed: false,
            rejected_by: None,
            source: RejectionSource::ScannerPipeline,
        };

        for scanner in &self.scanners {
            let started = std::time::Instant::now();
            let ScannerResult { verdict, risk_score, findings, clarification_needed } =
                scanner.scan(plan).await;
            tracing::debug!(
                scanner = scanner.name(),
                %verdict,
                risk_score,
                findings = findings.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                plan_id = %plan.plan_id,
                "scanner pass"
            );

            report.verdict = report.verdict.max(verdict);
            report.risk_score = report.risk_score.max(risk_score);
            report.findings.extend(findings);
            report.clarification_needed |= clarification_needed;

            if verdict == Verdict::Reject {
                report.rejected_by = Some(scanner.name().to_string());
                report.source = scanner.rejection_source();
                tracing::warn!(
                    scanner = scanner.name(),
                    plan_id = %plan.plan_id,
                    risk_score = report.risk_score,
                    "plan rejected by admission pipeline"
                );
                break;
            }
        }

        if report.verdict == Verdict::Warn {
            tracing::warn!(
                plan_id = %plan.plan_id,
                risk_score = report.risk_score,
                findings = report.findings.len(),
                "admission pipeline passed with warnings"
            );
        }

        report
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
