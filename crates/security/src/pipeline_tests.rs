// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::scanner::{Finding, Scanner, ScannerResult, ThreatType, Verdict};
use async_trait::async_trait;
use iml_core::{Plan, RejectionSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FixedScanner {
    name: &'static str,
    result: ScannerResult,
    source: RejectionSource,
    calls: AtomicUsize,
}

impl FixedScanner {
    fn new(name: &'static str, result: ScannerResult) -> Arc<Self> {
        Arc::new(Self {
            name,
            result,
            source: RejectionSource::ScannerPipeline,
            calls: AtomicUsize::new(0),
        })
    }

    fn with_source(name: &'static str, result: ScannerResult, source: RejectionSource) -> Arc<Self> {
        Arc::new(Self { name, result, source, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl Scanner for FixedScanner {
    fn name(&self) -> &str {
        self.name
    }

    fn rejection_source(&self) -> RejectionSource {
        self.source
    }

    async fn scan(&self, _plan: &Plan) -> ScannerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn plan() -> Plan {
    Plan::builder().build()
}

#[tokio::test]
async fn empty_pipeline_passes() {
    let report = SecurityPipeline::default().scan(&plan()).await;
    assert_eq!(report.verdict, Verdict::Pass);
    assert!(!report.is_rejected());
}

#[tokio::test]
async fn verdict_and_risk_are_maxima() {
    let pipeline = SecurityPipeline::new(vec![
        FixedScanner::new("a", ScannerResult::warn(0.3, vec![Finding::new("a", "one")])),
        FixedScanner::new("b", ScannerResult::warn(0.7, vec![Finding::new("b", "two")])),
        FixedScanner::new("c", ScannerResult::pass()),
    ]);
    let report = pipeline.scan(&plan()).await;
    assert_eq!(report.verdict, Verdict::Warn);
    assert_eq!(report.risk_score, 0.7);
    let scanners: Vec<&str> = report.findings.iter().map(|f| f.scanner.as_str()).collect();
    assert_eq!(scanners, vec!["a", "b"]);
}

#[tokio::test]
async fn reject_short_circuits_later_scanners() {
    let rejecting = FixedScanner::new("gate", ScannerResult::reject(0.95, vec![]));
    let after = FixedScanner::new("after", ScannerResult::pass());
    let pipeline = SecurityPipeline::new(vec![rejecting.clone(), after.clone()]);

    let report = pipeline.scan(&plan()).await;
    assert!(report.is_rejected());
    assert_eq!(report.rejected_by.as_deref(), Some("gate"));
    assert_eq!(after.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejection_source_comes_from_the_rejecting_scanner() {
    let pipeline = SecurityPipeline::new(vec![FixedScanner::with_source(
        "intent_verifier",
        ScannerResult::reject(0.8, vec![]),
        RejectionSource::IntentVerifier,
    )]);
    let report = pipeline.scan(&plan()).await;
    assert_eq!(report.source, RejectionSource::IntentVerifier);
}

#[tokio::test]
async fn warn_is_logged_and_allowed() {
    let pipeline =
        SecurityPipeline::new(vec![FixedScanner::new("a", ScannerResult::warn(0.4, vec![]))]);
    let report = pipeline.scan(&plan()).await;
    assert_eq!(report.verdict, Verdict::Warn);
    assert!(!report.is_rejected());
}

#[tokio::test]
async fn rejection_details_aggregate_findings() {
    let pipeline = SecurityPipeline::new(vec![FixedScanner::new(
        "heuristic",
        ScannerResult::reject(
            0.9,
            vec![
                Finding::new("heuristic", "bad phrase").threat(ThreatType::PromptInjection),
                Finding::new("heuristic", "also bad").threat(ThreatType::PromptInjection),
            ],
        ),
    )]);
    let details = pipeline.scan(&plan()).await.to_rejection_details();

    assert_eq!(details.source, RejectionSource::ScannerPipeline);
    assert_eq!(details.verdict, "reject");
    assert_eq!(details.risk_score, 0.9);
    // Duplicate threat types are collapsed
    assert_eq!(details.threat_types, vec!["prompt_injection"]);
    assert_eq!(details.scanner_findings.len(), 2);
    assert_eq!(details.recommendations.len(), 2);
}

#[tokio::test]
async fn pipeline_is_idempotent_for_a_plan() {
    let pipeline = SecurityPipeline::new(vec![
        FixedScanner::new("a", ScannerResult::warn(0.5, vec![Finding::new("a", "x")])),
    ]);
    let p = plan();
    let first = pipeline.scan(&p).await;
    let second = pipeline.scan(&p).await;
    assert_eq!(first.verdict, second.verdict);
    assert_eq!(first.risk_score, second.risk_score);
    assert_eq!(first.findings, second.findings);
}
