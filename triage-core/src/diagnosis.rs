//! Root-cause diagnosis produced by the diagnosing stage.

use serde::{Deserialize, Serialize};

/// Well-known root-cause categories. The diagnoser may return finer-grained
/// labels (e.g. `payment_gateway_misconfiguration`); these are the coarse
/// buckets the draft-action mapping understands.
pub mod root_cause {
    pub const MERCHANT_MISCONFIGURATION: &str = "merchant_misconfiguration";
    pub const DOCUMENTATION_GAP: &str = "documentation_gap";
    pub const PLATFORM_REGRESSION: &str = "platform_regression";
    pub const UNKNOWN: &str = "unknown";
}

/// Reference to a retrieved document used as diagnosis evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub collection: String,
    /// Leading fragment of the document text, for audit display.
    pub snippet: String,
    pub score: f64,
}

/// Root-cause hypothesis. Produced once per session; immutable after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Category label, lowercased snake_case.
    pub root_cause: String,
    /// Confidence in [0, 1]; clamped at construction.
    pub confidence: f64,
    pub reasoning: String,
    /// Retrieved documents that informed the hypothesis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<DocumentRef>,
}

impl Diagnosis {
    pub fn new(root_cause: impl Into<String>, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            root_cause: root_cause.into(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<DocumentRef>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Low-confidence diagnoses carry an uncertainty notice in the
    /// rendered explanation.
    pub fn is_uncertain(&self) -> bool {
        self.confidence < 0.6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped_to_unit_range() {
        assert_eq!(Diagnosis::new(root_cause::UNKNOWN, 1.7, "").confidence, 1.0);
        assert_eq!(Diagnosis::new(root_cause::UNKNOWN, -0.2, "").confidence, 0.0);
        assert_eq!(Diagnosis::new(root_cause::UNKNOWN, 0.42, "").confidence, 0.42);
    }

    #[test]
    fn test_uncertainty_boundary() {
        assert!(Diagnosis::new("x", 0.59, "").is_uncertain());
        assert!(!Diagnosis::new("x", 0.6, "").is_uncertain());
    }

    #[test]
    fn test_serde_skips_empty_evidence() {
        let json =
            serde_json::to_string(&Diagnosis::new(root_cause::DOCUMENTATION_GAP, 0.8, "thin docs"))
                .unwrap();
        assert!(!json.contains("evidence"));
        let restored: Diagnosis = serde_json::from_str(&json).unwrap();
        assert!(restored.evidence.is_empty());
    }
}
