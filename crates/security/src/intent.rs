// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LLM-backed semantic plan inspection.
//!
//! The verifier describes the plan to a configured model provider and
//! expects a strict JSON verdict back. It is the slowest admission tier and
//! runs last; anything unparseable or late maps to WARN with a finding,
//! never to a silent PASS.

use crate::scanner::{Finding, Scanner, ScannerResult, ThreatType, Verdict};
use async_trait::async_trait;
use iml_core::{Plan, RejectionSource};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SCANNER_NAME: &str = "intent_verifier";

/// Which provider-shaped HTTP API to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Ollama,
}

iml_core::simple_display! {
    ProviderKind {
        Anthropic => "anthropic",
        OpenAi => "openai",
        Ollama => "ollama",
    }
}

/// Verifier configuration, resolved from the daemon config.
#[derive(Debug, Clone)]
pub struct IntentVerifierConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    /// Strict mode maps `clarify` to REJECT with `clarification_needed`;
    /// lenient mode maps it to WARN.
    pub strict: bool,
}

impl IntentVerifierConfig {
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(20),
            strict: false,
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            base_url: "https://api.openai.com".to_string(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(20),
            strict: false,
        }
    }

    pub fn ollama(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: base_url.into(),
            api_key: String::new(),
            model: model.into(),
            timeout: Duration::from_secs(60),
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Classified verdict from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentVerdict {
    Approve,
    Reject,
    Warn,
    Clarify,
}

/// JSON shape the model is instructed to answer with.
#[derive(Debug, Deserialize)]
struct IntentResponse {
    verdict: IntentVerdict,
    #[serde(default)]
    threat_type: Option<ThreatType>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// LLM-backed semantic scanner.
pub struct IntentVerifier {
    config: IntentVerifierConfig,
    client: reqwest::Client,
}

impl IntentVerifier {
    pub fn new(config: IntentVerifierConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }

    /// Render the plan into the review prompt.
    fn compose_prompt(plan: &Plan) -> String {
        let mut actions = String::new();
        for action in &plan.actions {
            actions.push_str(&format!(
                "- {} → {}.{} params={} depends_on={:?}\n",
                action.id,
                action.module,
                action.action,
                serde_json::to_string(&action.params).unwrap_or_default(),
                action.depends_on,
            ));
        }
        format!(
            "You are a security reviewer for an automation daemon. Review the \
             following plan of actions an AI model wants to execute on the \
             operator's machine.\n\nDescription: {}\nActions:\n{}\n\
             Respond with a single JSON object and nothing else:\n\
             {{\"verdict\": \"approve\"|\"reject\"|\"warn\"|\"clarify\", \
             \"threat_type\": \"command_injection\"|\"prompt_injection\"|\
             \"data_exfiltration\"|\"destructive_operation\"|\
             \"privilege_escalation\"|\"persistence\"|\"resource_abuse\"|\
             \"policy_violation\"|null, \
             \"rationale\": string, \"recommendations\": [string]}}",
            plan.description, actions,
        )
    }

    /// Dispatch one completion to the configured provider.
    async fn complete(&self, prompt: &str) -> Result<String, String> {
        let request = match self.config.provider {
            ProviderKind::Anthropic => self
                .client
                .post(format!("{}/v1/messages", self.config.base_url))
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&json!({
                    "model": self.config.model,
                    "max_tokens": 512,
                    "messages": [{"role": "user", "content": prompt}],
                })),
            ProviderKind::OpenAi => self
                .client
                .post(format!("{}/v1/chat/completions", self.config.base_url))
                .bearer_auth(&self.config.api_key)
                .json(&json!({
                    "model": self.config.model,
                    "messages": [{"role": "user", "content": prompt}],
                })),
            ProviderKind::Ollama => self
                .client
                .post(format!("{}/api/generate", self.config.base_url))
                .json(&json!({
                    "model": self.config.model,
                    "prompt": prompt,
                    "stream": false,
                    "format": "json",
                })),
        };

        let response = request
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;

        let text = match self.config.provider {
            ProviderKind::Anthropic => body["content"][0]["text"].as_str(),
            ProviderKind::OpenAi => body["choices"][0]["message"]["content"].as_str(),
            ProviderKind::Ollama => body["response"].as_str(),
        };
        text.map(str::to_string).ok_or_else(|| "empty completion".to_string())
    }

    /// Parse the model's reply, tolerating code fences around the JSON.
    fn parse_response(text: &str) -> Result<IntentResponse, String> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(trimmed);
        serde_json::from_str(inner.trim()).map_err(|e| e.to_string())
    }

    fn inconclusive(reason: &str) -> ScannerResult {
        ScannerResult::warn(
            0.0,
            vec![Finding::new(SCANNER_NAME, format!("verifier inconclusive: {reason}"))],
        )
    }
}

#[async_trait]
impl Scanner for IntentVerifier {
    fn name(&self) -> &str {
        SCANNER_NAME
    }

    fn rejection_source(&self) -> RejectionSource {
        RejectionSource::IntentVerifier
    }

    async fn scan(&self, plan: &Plan) -> ScannerResult {
        let prompt = Self::compose_prompt(plan);
        let text = match self.complete(&prompt).await {
            Ok(t) => t,
            Err(reason) => {
                tracing::warn!(provider = %self.config.provider, %reason, "intent verifier call failed");
                return Self::inconclusive(&reason);
            }
        };
        let response = match Self::parse_response(&text) {
            Ok(r) => r,
            Err(reason) => {
                tracing::warn!(provider = %self.config.provider, %reason, "unparseable verifier reply");
                return Self::inconclusive(&reason);
            }
        };

        let mut finding = Finding::new(SCANNER_NAME, response.rationale.clone());
        if let Some(threat) = response.threat_type {
            finding = finding.threat(threat);
        }
        let mut findings = vec![finding];
        findings.extend(
            response.recommendations.iter().map(|r| Finding::new(SCANNER_NAME, r.clone())),
        );

        match response.verdict {
            IntentVerdict::Approve => ScannerResult::pass(),
            IntentVerdict::Warn => ScannerResult::warn(0.5, findings),
            IntentVerdict::Reject => ScannerResult::reject(0.9, findings),
            IntentVerdict::Clarify if self.config.strict => ScannerResult {
                verdict: Verdict::Reject,
                risk_score: 0.5,
                findings,
                clarification_needed: true,
            },
            IntentVerdict::Clarify => ScannerResult {
                verdict: Verdict::Warn,
                risk_score: 0.3,
                findings,
                clarification_needed: true,
            },
        }
    }
}

#[cfg(test)]
#[path = "intent_tests.rs"]
mod tests;
