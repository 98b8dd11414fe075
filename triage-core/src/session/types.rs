//! The session record — the unit of work moving through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{ActionKind, ProposedAction};
use crate::cluster::Cluster;
use crate::decision::Decision;
use crate::diagnosis::Diagnosis;
use crate::report::Report;
use crate::risk::{RiskAssessment, RiskTier};
use crate::session::state::{SessionStatus, TransitionRecord};

/// Session identifier (UUID v4 string).
pub type SessionId = String;

/// Why a session ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// No valid reports survived observation.
    Validation,
    /// Diagnoser timeout or malformed response.
    DiagnosisFailed,
    /// Knowledge store unreachable (recorded when degradation was fatal).
    Retrieval,
    Internal,
}

/// Recorded failure detail, kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

/// Outcome of an approval-queue resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResolution {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// The unit of work. Created on submit, mutated exclusively by the
/// orchestrator as stages advance, immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Input reports in submission order. Report ids derive from these.
    pub reports: Vec<Report>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Cluster>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ProposedAction>,
    pub requires_approval: bool,
    /// Internal-only rendering; never shown to the reporting merchant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Warnings recorded while observing (dropped reports etc.).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ApprovalResolution>,
    /// Stage audit trail, accumulated across run and resume.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(reports: Vec<Report>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            reports,
            status: SessionStatus::Created,
            cluster: None,
            diagnosis: None,
            risk: None,
            decision: None,
            action: None,
            requires_approval: false,
            explanation: None,
            warnings: Vec::new(),
            error: None,
            resolution: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn report_ids(&self) -> Vec<&str> {
        self.reports.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record the gate outcome, keeping `requires_approval` consistent
    /// with it.
    pub fn set_decision(&mut self, decision: Decision) {
        self.requires_approval = decision.requires_approval();
        self.decision = Some(decision);
        self.touch();
    }

    /// Record why the session failed.
    pub fn set_error(&mut self, kind: SessionErrorKind, message: impl Into<String>) {
        self.error = Some(SessionError {
            kind,
            message: message.into(),
        });
        self.touch();
    }

    /// Append a stage transition to the audit trail.
    pub fn record_transition(&mut self, record: TransitionRecord) {
        self.status = record.to;
        self.transitions.push(record);
        self.touch();
    }

    /// Condensed view for listings and queue rendering.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            status: self.status,
            report_count: self.reports.len(),
            label: self.cluster.as_ref().map(|c| c.label.clone()),
            tier: self.risk.map(|r| r.tier),
            decision: self.decision,
            action_kind: self.action.as_ref().map(|a| a.kind),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Condensed session view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub status: SessionStatus,
    pub report_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<RiskTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_kind: Option<ActionKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{MigrationStage, Priority};

    fn sample_report() -> Report {
        Report::new(
            "r1",
            "merchant-1",
            "Checkout broken",
            "500 on submit",
            MigrationStage::PostMigration,
            Priority::High,
        )
    }

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new(vec![sample_report()]);
        assert_eq!(session.status, SessionStatus::Created);
        assert!(!session.requires_approval);
        assert!(!session.is_terminal());
        assert_eq!(session.report_ids(), vec!["r1"]);
        assert_eq!(session.id.len(), 36, "uuid v4 string id");
    }

    #[test]
    fn test_set_decision_keeps_approval_flag_consistent() {
        let mut session = Session::new(vec![sample_report()]);

        session.set_decision(Decision::AutoFix);
        assert!(!session.requires_approval);

        session.set_decision(Decision::RequiresApproval);
        assert!(session.requires_approval);

        session.set_decision(Decision::ForceEscalate);
        assert!(session.requires_approval);
    }

    #[test]
    fn test_record_transition_updates_status() {
        let mut session = Session::new(vec![sample_report()]);
        session.record_transition(TransitionRecord {
            from: SessionStatus::Created,
            to: SessionStatus::Observing,
            at: Utc::now(),
            elapsed_ms: 1,
            reason: None,
        });
        assert_eq!(session.status, SessionStatus::Observing);
        assert_eq!(session.transitions.len(), 1);
    }

    #[test]
    fn test_session_serde_roundtrip() {
        let mut session = Session::new(vec![sample_report()]);
        session.set_decision(Decision::RequiresApproval);
        session.set_error(SessionErrorKind::DiagnosisFailed, "model timed out");

        let json = serde_json::to_string_pretty(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.decision, Some(Decision::RequiresApproval));
        assert_eq!(
            restored.error.as_ref().map(|e| e.kind),
            Some(SessionErrorKind::DiagnosisFailed)
        );
    }

    #[test]
    fn test_summary_reflects_progress() {
        let mut session = Session::new(vec![sample_report()]);
        session.cluster = Some(Cluster {
            member_ids: vec!["r1".into()],
            label: "checkout 500".into(),
            count: 1,
            volume_spike: false,
            abnormal_pattern: true,
        });
        let summary = session.summary();
        assert_eq!(summary.report_count, 1);
        assert_eq!(summary.label.as_deref(), Some("checkout 500"));
        assert!(summary.tier.is_none());
    }
}
