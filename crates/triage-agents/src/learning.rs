//! Learning write-back: records dispatched outcomes as past incidents.
//!
//! Called from the orchestrator's learning stage after every successful
//! run. Capture failures are logged and swallowed; a session still
//! dispatches when the knowledge base is down.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use triage_core::Session;

use crate::knowledge::{collections, KnowledgeStore};

/// Routes dispatched-session outcomes into the `past_incidents` collection.
///
/// Deduplicates on the `Issue:` line so resubmitted batches with the same
/// dominant cluster do not pile up identical incident documents.
pub struct LearningSync<'a> {
    kb: &'a dyn KnowledgeStore,
    dedup_enabled: bool,
}

impl<'a> LearningSync<'a> {
    pub fn new(kb: &'a dyn KnowledgeStore) -> Self {
        Self {
            kb,
            dedup_enabled: true,
        }
    }

    /// Disable deduplication (useful for testing or forced re-captures).
    pub fn without_dedup(mut self) -> Self {
        self.dedup_enabled = false;
        self
    }

    /// Capture a resolved session, returning the new document id when one
    /// was written. `None` means skipped (incomplete session or duplicate)
    /// or failed; failures never propagate.
    pub async fn record(&self, session: &Session) -> Option<String> {
        let (cluster, diagnosis, action) = match (
            &session.cluster,
            &session.diagnosis,
            &session.action,
        ) {
            (Some(cluster), Some(diagnosis), Some(action)) => (cluster, diagnosis, action),
            _ => {
                debug!(
                    session_id = %session.id,
                    "Skipping learning capture: session missing triage stages"
                );
                return None;
            }
        };

        let issue_line = format!("Issue: {}", cluster.label);
        if self.dedup_enabled && self.issue_exists(&issue_line).await {
            debug!(session_id = %session.id, "Skipping duplicate incident capture");
            return None;
        }

        let first_action_line = action.content.lines().next().unwrap_or("").trim();
        let content = format!(
            "{issue_line}\n\
             Root cause: {} (confidence {:.2})\n\
             Resolution: {} — {first_action_line}\n\
             Outcome: dispatched\n",
            diagnosis.root_cause, diagnosis.confidence, action.kind,
        );

        let mut metadata = HashMap::new();
        metadata.insert("session_id".to_string(), session.id.clone());
        metadata.insert("root_cause".to_string(), diagnosis.root_cause.clone());
        metadata.insert(
            "risk_tier".to_string(),
            session
                .risk
                .map(|r| r.tier.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        );
        metadata.insert("action_kind".to_string(), action.kind.to_string());
        metadata.insert(
            "date".to_string(),
            session.updated_at.format("%Y-%m-%d").to_string(),
        );

        match self
            .kb
            .add(collections::PAST_INCIDENTS, &content, metadata)
            .await
        {
            Ok(id) => {
                info!(session_id = %session.id, doc_id = %id, "Captured incident");
                Some(id)
            }
            Err(e) => {
                warn!(session_id = %session.id, "Failed to capture incident (non-fatal): {e}");
                None
            }
        }
    }

    /// Check if an incident with the same `Issue:` line is already recorded.
    ///
    /// Returns `false` when the query itself fails; a broken dedup lookup
    /// must not block the capture.
    async fn issue_exists(&self, issue_line: &str) -> bool {
        match self
            .kb
            .query(collections::PAST_INCIDENTS, issue_line, 5)
            .await
        {
            Ok(docs) => docs
                .iter()
                .any(|d| d.content.lines().next() == Some(issue_line)),
            Err(e) => {
                debug!("Dedup query failed (proceeding with capture): {e}");
                false
            }
        }
    }
}
