//! Root-cause diagnoser backends.
//!
//! `HttpDiagnoser` talks to an OpenAI-compatible chat completions endpoint;
//! `HeuristicDiagnoser` is a deterministic keyword classifier for offline
//! and demo use. Both return raw model text; the payloads are validated
//! fail-closed in [`crate::contracts`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use triage_core::root_cause;

use crate::config::{check_endpoint, TriageConfig};
use crate::knowledge::ScoredDocument;

/// Everything the diagnoser sees about a session.
#[derive(Debug, Clone)]
pub struct DiagnosisContext {
    pub cluster_label: String,
    pub report_count: usize,
    /// Subject and description excerpts from representative reports.
    pub sample_text: String,
    /// Retrieved documents, most relevant first.
    pub evidence: Vec<ScoredDocument>,
}

/// Inputs for drafting an automated remediation.
#[derive(Debug, Clone)]
pub struct FixContext {
    pub cluster_label: String,
    pub root_cause: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Abstraction over diagnosis backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Diagnoser: Send + Sync {
    /// Produce a raw diagnosis payload for a clustered batch.
    async fn diagnose(&self, context: &DiagnosisContext) -> Result<String>;

    /// Produce a raw remediation payload for an auto-fix run.
    async fn generate_fix(&self, context: &FixContext) -> Result<String>;

    /// Check if the backend is reachable.
    async fn available(&self) -> bool;
}

const DIAGNOSIS_SYSTEM_PROMPT: &str = r#"You are a support triage analyst for a commerce platform migration.
Given a cluster of merchant reports and retrieved knowledge documents, identify the most likely root cause.

Respond with a single JSON object:
{"root_cause": "<category>", "confidence": <0.0-1.0>, "reasoning": "<short explanation>"}

Categories: merchant_misconfiguration, documentation_gap, platform_regression, unknown.
Use a finer-grained label (e.g. payment_gateway_misconfiguration) only when the evidence clearly supports it."#;

const FIX_SYSTEM_PROMPT: &str = r#"You are a support triage analyst drafting a remediation for a diagnosed issue.

Respond with a single JSON object:
{"kind": "auto_fix|manual_steps|escalate", "content": "<the remediation text>"}

The content must be complete and actionable on its own."#;

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// Diagnoser backed by an OpenAI-compatible `chat/completions` endpoint.
pub struct HttpDiagnoser {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl HttpDiagnoser {
    pub fn new(config: &TriageConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.model_url.trim_end_matches('/').to_string(),
            model: config.model_name.clone(),
            http: reqwest::Client::builder()
                .timeout(config.diagnoser_timeout())
                .build()
                .context("Failed to build diagnoser HTTP client")?,
        })
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            max_tokens: 1024,
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Model API error ({status}): {body}");
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse response: {e}"))?;

        let choice = chat_response
            .choices
            .first()
            .ok_or_else(|| anyhow!("No response from model"))?;

        // Reasoning models may put the answer in reasoning_content only.
        Ok(choice
            .message
            .content
            .clone()
            .or_else(|| choice.message.reasoning_content.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Diagnoser for HttpDiagnoser {
    async fn diagnose(&self, context: &DiagnosisContext) -> Result<String> {
        debug!(label = %context.cluster_label, model = %self.model, "Requesting diagnosis");
        self.complete(DIAGNOSIS_SYSTEM_PROMPT, &format_diagnosis_prompt(context))
            .await
    }

    async fn generate_fix(&self, context: &FixContext) -> Result<String> {
        debug!(label = %context.cluster_label, model = %self.model, "Requesting fix draft");
        self.complete(FIX_SYSTEM_PROMPT, &format_fix_prompt(context))
            .await
    }

    async fn available(&self) -> bool {
        check_endpoint(&self.base_url).await
    }
}

fn format_diagnosis_prompt(context: &DiagnosisContext) -> String {
    let evidence = if context.evidence.is_empty() {
        "No documents retrieved.".to_string()
    } else {
        context
            .evidence
            .iter()
            .map(|d| format!("- [{}] {} (score {:.2}): {}", d.collection, d.id, d.score, d.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Report Cluster\n\nLabel: {}\nReports in cluster: {}\n\n## Sample Reports\n\n{}\n\n## Retrieved Knowledge\n\n{}",
        context.cluster_label, context.report_count, context.sample_text, evidence
    )
}

fn format_fix_prompt(context: &FixContext) -> String {
    format!(
        "## Diagnosed Issue\n\nCluster: {}\nRoot cause: {} (confidence {:.2})\n\n## Reasoning\n\n{}\n\nDraft an automated remediation for this issue.",
        context.cluster_label, context.root_cause, context.confidence, context.reasoning
    )
}

/// Keywords that indicate merchant-side configuration problems.
const MISCONFIGURATION_KEYWORDS: &[&str] = &[
    "webhook",
    "configuration",
    "config",
    "settings",
    "api key",
    "credential",
    "certificate",
    "endpoint",
    "callback",
    "not configured",
    "expired",
];

/// Keywords that indicate missing or unclear documentation.
const DOCUMENTATION_KEYWORDS: &[&str] = &[
    "how do i",
    "how to",
    "unclear",
    "documentation",
    "docs",
    "guide",
    "cannot find",
    "can't find",
    "confused",
    "where is",
    "instructions",
];

/// Keywords that indicate a defect on the platform side.
const REGRESSION_KEYWORDS: &[&str] = &[
    "500",
    "502",
    "503",
    "crash",
    "regression",
    "since the migration",
    "stopped working",
    "worked before",
    "internal error",
    "all merchants",
    "every request",
];

/// Deterministic keyword-scored diagnoser for offline and demo use.
///
/// Classification is a pure function of the context text, so repeated
/// runs over the same batch produce identical diagnoses.
pub struct HeuristicDiagnoser;

impl HeuristicDiagnoser {
    fn classify(text: &str) -> (&'static str, usize) {
        let lower = text.to_lowercase();

        let misconfig_hits = MISCONFIGURATION_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count();
        let docs_hits = DOCUMENTATION_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count();
        let regression_hits = REGRESSION_KEYWORDS
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count();

        // Regression signals dominate ties.
        if regression_hits > 0 && regression_hits >= misconfig_hits && regression_hits >= docs_hits
        {
            return (root_cause::PLATFORM_REGRESSION, regression_hits);
        }
        if misconfig_hits > 0 && misconfig_hits >= docs_hits {
            return (root_cause::MERCHANT_MISCONFIGURATION, misconfig_hits);
        }
        if docs_hits > 0 {
            return (root_cause::DOCUMENTATION_GAP, docs_hits);
        }
        (root_cause::UNKNOWN, 0)
    }

    fn confidence_for(hits: usize) -> f64 {
        match hits {
            0 => 0.3,
            1 => 0.55,
            2 => 0.7,
            3 => 0.8,
            _ => 0.9,
        }
    }
}

#[async_trait]
impl Diagnoser for HeuristicDiagnoser {
    async fn diagnose(&self, context: &DiagnosisContext) -> Result<String> {
        let text = format!("{} {}", context.cluster_label, context.sample_text);
        let (cause, hits) = Self::classify(&text);
        let confidence = Self::confidence_for(hits);
        let reasoning = format!(
            "Keyword scan over {} reports matched {} {} signal(s).",
            context.report_count, hits, cause
        );

        let payload = serde_json::json!({
            "root_cause": cause,
            "confidence": confidence,
            "reasoning": reasoning,
        });
        Ok(payload.to_string())
    }

    async fn generate_fix(&self, context: &FixContext) -> Result<String> {
        let content = format!(
            "## Automated remediation\n\nDiagnosed cause: {} (confidence {:.2}).\n{}\n\nSteps applied:\n1. Re-applied the documented configuration for the affected integration.\n2. Replayed the failed deliveries observed in \"{}\".\n3. Verified the error rate returned to baseline.",
            context.root_cause, context.confidence, context.reasoning, context.cluster_label
        );
        let payload = serde_json::json!({
            "kind": "auto_fix",
            "content": content,
        });
        Ok(payload.to_string())
    }

    async fn available(&self) -> bool {
        true
    }
}
