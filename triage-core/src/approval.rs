//! The approval queue — durable holding area for sessions needing sign-off.
//!
//! The queue references sessions, it never owns their lifecycle: entries
//! carry the session id plus the minimal fields a review surface needs to
//! render a row. Resolving an entry removes it and records the resolution;
//! resolving the same id twice is an error, surfacing double-submission
//! bugs in approval UIs instead of silently absorbing them.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::ActionKind;
use crate::risk::RiskTier;
use crate::session::{Session, SessionId, SessionStatus};

/// Errors from approval operations.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("No pending approval for session {id}")]
    NotFound { id: SessionId },

    #[error("Session {id} was already resolved")]
    AlreadyResolved { id: SessionId },

    #[error("Session {id} is not awaiting approval (status: {status})")]
    InvalidState {
        id: SessionId,
        status: SessionStatus,
    },

    #[error("Approval queue lock poisoned")]
    LockPoisoned,
}

/// One reviewable row. A snapshot taken at enqueue time; the session
/// remains the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub session_id: SessionId,
    /// Cluster label shown as the row subject.
    pub subject: String,
    pub tier: RiskTier,
    pub action_kind: ActionKind,
    pub report_count: usize,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Build the row for a session parked at the suspension point.
    ///
    /// Sessions reach the queue only after risk assessment and drafting,
    /// so the fallbacks here are conservative placeholders for snapshots
    /// missing those fields.
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            subject: session
                .cluster
                .as_ref()
                .map(|c| c.label.clone())
                .unwrap_or_else(|| "unclustered batch".to_string()),
            tier: session.risk.map(|r| r.tier).unwrap_or(RiskTier::High),
            action_kind: session
                .action
                .as_ref()
                .map(|a| a.kind)
                .unwrap_or(ActionKind::ManualSteps),
            report_count: session.reports.len(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Outcome of resolving a queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub session_id: SessionId,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueInner {
    pending: Vec<QueueEntry>,
    resolved: HashMap<SessionId, Resolution>,
}

/// Thread-safe approval queue.
#[derive(Default)]
pub struct ApprovalQueue {
    inner: Mutex<QueueInner>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Re-enqueueing a pending session id replaces its row.
    pub fn enqueue(&self, entry: QueueEntry) -> Result<(), ApprovalError> {
        let mut inner = self.inner.lock().map_err(|_| ApprovalError::LockPoisoned)?;
        if let Some(existing) = inner
            .pending
            .iter_mut()
            .find(|e| e.session_id == entry.session_id)
        {
            debug!(session_id = %entry.session_id, "Replacing pending queue entry");
            *existing = entry;
        } else {
            inner.pending.push(entry);
        }
        Ok(())
    }

    /// Pending entries, oldest first.
    pub fn list_pending(&self) -> Result<Vec<QueueEntry>, ApprovalError> {
        let inner = self.inner.lock().map_err(|_| ApprovalError::LockPoisoned)?;
        let mut pending = inner.pending.clone();
        pending.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(pending)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().map(|i| i.pending.len()).unwrap_or(0)
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.inner
            .lock()
            .map(|i| i.pending.iter().any(|e| e.session_id == session_id))
            .unwrap_or(false)
    }

    /// Remove the entry for `session_id` and record its resolution.
    ///
    /// A second resolve for the same id returns
    /// [`ApprovalError::AlreadyResolved`]; an id that was never enqueued
    /// returns [`ApprovalError::NotFound`].
    pub fn resolve(
        &self,
        session_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<Resolution, ApprovalError> {
        let mut inner = self.inner.lock().map_err(|_| ApprovalError::LockPoisoned)?;

        if inner.resolved.contains_key(session_id) {
            return Err(ApprovalError::AlreadyResolved {
                id: session_id.to_string(),
            });
        }

        let position = inner
            .pending
            .iter()
            .position(|e| e.session_id == session_id)
            .ok_or_else(|| ApprovalError::NotFound {
                id: session_id.to_string(),
            })?;
        inner.pending.remove(position);

        let resolution = Resolution {
            session_id: session_id.to_string(),
            approved,
            notes,
            resolved_at: Utc::now(),
        };
        inner
            .resolved
            .insert(session_id.to_string(), resolution.clone());
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(session_id: &str, minutes_ago: i64) -> QueueEntry {
        QueueEntry {
            session_id: session_id.into(),
            subject: "checkout 500".into(),
            tier: RiskTier::High,
            action_kind: ActionKind::ManualSteps,
            report_count: 3,
            enqueued_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_list_pending_oldest_first() {
        let queue = ApprovalQueue::new();
        queue.enqueue(entry("s2", 5)).unwrap();
        queue.enqueue(entry("s1", 30)).unwrap();
        queue.enqueue(entry("s3", 1)).unwrap();

        let pending = queue.list_pending().unwrap();
        let ids: Vec<&str> = pending.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_resolve_removes_entry() {
        let queue = ApprovalQueue::new();
        queue.enqueue(entry("s1", 1)).unwrap();
        assert!(queue.is_pending("s1"));

        let resolution = queue
            .resolve("s1", true, Some("looks right".into()))
            .unwrap();
        assert!(resolution.approved);
        assert_eq!(resolution.notes.as_deref(), Some("looks right"));
        assert!(!queue.is_pending("s1"));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_double_resolve_is_an_error() {
        let queue = ApprovalQueue::new();
        queue.enqueue(entry("s1", 1)).unwrap();

        queue.resolve("s1", false, None).unwrap();
        let err = queue.resolve("s1", true, None).unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyResolved { .. }));
    }

    #[test]
    fn test_resolve_unknown_id_is_not_found() {
        let queue = ApprovalQueue::new();
        let err = queue.resolve("ghost", true, None).unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound { .. }));
    }

    #[test]
    fn test_reenqueue_replaces_pending_row() {
        let queue = ApprovalQueue::new();
        queue.enqueue(entry("s1", 10)).unwrap();
        let mut updated = entry("s1", 0);
        updated.report_count = 9;
        queue.enqueue(updated).unwrap();

        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.list_pending().unwrap()[0].report_count, 9);
    }
}
