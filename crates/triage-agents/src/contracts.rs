//! Diagnoser wire contracts and fail-closed parsing.
//!
//! The diagnoser returns raw model text. The orchestrator must parse it
//! into a typed payload before consuming; malformed payloads are rejected
//! (fail-closed) and the session records a diagnosis failure instead of
//! guessing.
//!
//! ## Payload schemas
//!
//! ```text
//! diagnosis: { "root_cause": "...", "confidence": 0.0..=1.0, "reasoning": "..." }
//! fix:       { "kind": "auto_fix" | "manual_steps" | "escalate", "content": "..." }
//! ```
//!
//! Out-of-range confidence is clamped; everything structurally wrong
//! (missing fields, non-finite numbers, unknown kinds) is an error.

use serde::Deserialize;
use triage_core::{ActionKind, Diagnosis, ProposedAction};

/// Why a raw payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ContractViolation {
    #[error("payload is not valid JSON: {detail}")]
    Malformed { detail: String },
    #[error("payload field `{field}` is missing or empty")]
    MissingField { field: &'static str },
    #[error("confidence is not a finite number")]
    NonFiniteConfidence,
    #[error("unknown action kind `{kind}`")]
    UnknownKind { kind: String },
}

#[derive(Debug, Deserialize)]
struct RawDiagnosis {
    root_cause: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawFix {
    kind: String,
    content: String,
}

/// Parse a raw diagnosis payload into a typed [`Diagnosis`].
///
/// The category label is normalized to lowercased snake_case; confidence
/// is clamped to [0, 1] by `Diagnosis::new`.
pub fn parse_diagnosis(raw: &str) -> Result<Diagnosis, ContractViolation> {
    let json_str = extract_json_block(raw).unwrap_or(raw);

    let payload: RawDiagnosis =
        serde_json::from_str(json_str).map_err(|e| ContractViolation::Malformed {
            detail: e.to_string(),
        })?;

    let root_cause = payload.root_cause.trim().to_lowercase().replace(' ', "_");
    if root_cause.is_empty() {
        return Err(ContractViolation::MissingField {
            field: "root_cause",
        });
    }
    if !payload.confidence.is_finite() {
        return Err(ContractViolation::NonFiniteConfidence);
    }

    Ok(Diagnosis::new(
        root_cause,
        payload.confidence,
        payload.reasoning.trim(),
    ))
}

/// Parse a raw fix payload into a typed [`ProposedAction`].
pub fn parse_fix(raw: &str) -> Result<ProposedAction, ContractViolation> {
    let json_str = extract_json_block(raw).unwrap_or(raw);

    let payload: RawFix =
        serde_json::from_str(json_str).map_err(|e| ContractViolation::Malformed {
            detail: e.to_string(),
        })?;

    let kind = match payload.kind.trim().to_lowercase().as_str() {
        "auto_fix" => ActionKind::AutoFix,
        "manual_steps" => ActionKind::ManualSteps,
        "escalate" => ActionKind::Escalate,
        other => {
            return Err(ContractViolation::UnknownKind {
                kind: other.to_string(),
            })
        }
    };

    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ContractViolation::MissingField { field: "content" });
    }

    Ok(ProposedAction::new(kind, content))
}

/// Try to extract a JSON block from a response that may contain surrounding text.
fn extract_json_block(text: &str) -> Option<&str> {
    // Look for ```json ... ``` fenced blocks
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }

    // Look for first { to last }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
