//! Proposed remediation actions and reviewer-facing drafts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::diagnosis::{root_cause, Diagnosis};

/// What kind of remediation a session proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// System-generated fix dispatched without review.
    AutoFix,
    /// Hand-off to engineering.
    Escalate,
    /// Instructions or a response draft for a human to deliver.
    ManualSteps,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoFix => write!(f, "auto_fix"),
            Self::Escalate => write!(f, "escalate"),
            Self::ManualSteps => write!(f, "manual_steps"),
        }
    }
}

/// One per session. May be superseded by a human-edited version after
/// approval; never mutated after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub kind: ActionKind,
    pub content: String,
    pub generated_at: DateTime<Utc>,
}

impl ProposedAction {
    pub fn new(kind: ActionKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            generated_at: Utc::now(),
        }
    }

    /// Draft shown to reviewers while a session waits for approval.
    ///
    /// Built without a model call so parking a session never depends on the
    /// diagnoser being reachable. Force-escalations always draft an
    /// engineering hand-off; otherwise the kind follows the root-cause
    /// category.
    pub fn draft(diagnosis: &Diagnosis, decision: Decision) -> Self {
        let kind = match decision {
            Decision::ForceEscalate => ActionKind::Escalate,
            _ => kind_for_root_cause(&diagnosis.root_cause),
        };
        Self::new(kind, draft_content(kind, diagnosis))
    }
}

/// Draft-action mapping for approval-path sessions.
pub fn kind_for_root_cause(category: &str) -> ActionKind {
    match category {
        root_cause::PLATFORM_REGRESSION => ActionKind::Escalate,
        _ => ActionKind::ManualSteps,
    }
}

fn draft_content(kind: ActionKind, diagnosis: &Diagnosis) -> String {
    let mut md = match kind {
        ActionKind::Escalate => format!(
            "## Engineering escalation\n\n\
             - **Suspected root cause:** {}\n\
             - **Confidence:** {:.2}\n\
             - **Evidence documents:** {}\n",
            diagnosis.root_cause,
            diagnosis.confidence,
            diagnosis.evidence.len(),
        ),
        _ => match diagnosis.root_cause.as_str() {
            root_cause::MERCHANT_MISCONFIGURATION => format!(
                "## Setup instructions\n\n\
                 Walk the merchant through re-checking their configuration.\n\
                 Suspected misconfiguration: {}\n",
                diagnosis.reasoning,
            ),
            root_cause::DOCUMENTATION_GAP => format!(
                "## Support response draft\n\n\
                 The migration docs do not cover this case. Draft response:\n\
                 {}\n",
                diagnosis.reasoning,
            ),
            _ => format!(
                "## Manual review requested\n\n\
                 Root cause `{}` could not be mapped to a playbook.\n\
                 Diagnosis notes: {}\n",
                diagnosis.root_cause, diagnosis.reasoning,
            ),
        },
    };

    if !diagnosis.evidence.is_empty() {
        md.push_str("\n### Supporting documents\n");
        for doc in &diagnosis.evidence {
            md.push_str(&format!("- [{}] {}\n", doc.collection, doc.id));
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::DocumentRef;

    #[test]
    fn test_force_escalate_always_drafts_escalation() {
        let diagnosis = Diagnosis::new(root_cause::MERCHANT_MISCONFIGURATION, 0.9, "creds");
        let action = ProposedAction::draft(&diagnosis, Decision::ForceEscalate);
        assert_eq!(action.kind, ActionKind::Escalate);
        assert!(action.content.contains("Engineering escalation"));
    }

    #[test]
    fn test_kind_follows_root_cause_for_approval_drafts() {
        let cases = [
            (root_cause::MERCHANT_MISCONFIGURATION, ActionKind::ManualSteps),
            (root_cause::DOCUMENTATION_GAP, ActionKind::ManualSteps),
            (root_cause::PLATFORM_REGRESSION, ActionKind::Escalate),
            (root_cause::UNKNOWN, ActionKind::ManualSteps),
        ];
        for (category, expected) in cases {
            let diagnosis = Diagnosis::new(category, 0.7, "notes");
            let action = ProposedAction::draft(&diagnosis, Decision::RequiresApproval);
            assert_eq!(action.kind, expected, "category {category}");
        }
    }

    #[test]
    fn test_draft_lists_evidence() {
        let diagnosis = Diagnosis::new(root_cause::DOCUMENTATION_GAP, 0.7, "docs thin")
            .with_evidence(vec![DocumentRef {
                id: "pi-1".into(),
                collection: "migration_docs".into(),
                snippet: "webhook setup".into(),
                score: 0.8,
            }]);
        let action = ProposedAction::draft(&diagnosis, Decision::RequiresApproval);
        assert!(action.content.contains("Supporting documents"));
        assert!(action.content.contains("migration_docs"));
    }

    #[test]
    fn test_action_kind_display() {
        assert_eq!(ActionKind::AutoFix.to_string(), "auto_fix");
        assert_eq!(ActionKind::ManualSteps.to_string(), "manual_steps");
    }
}
