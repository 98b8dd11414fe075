//! Derived metrics — a read-only projection over stored sessions.
//!
//! Nothing here is stored independently; every figure is recomputed from
//! the session store on demand, so counters can never drift from the
//! sessions they describe.

use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::session::{Session, SessionStatus};

/// Aggregate triage figures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageMetrics {
    pub sessions_total: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub rejected: usize,
    pub awaiting_approval: usize,
    /// Dispatched without human review.
    pub auto_fixed: usize,
    /// Sessions the anomaly rules forced to engineering.
    pub escalated: usize,
    /// auto_fixed / dispatched.
    pub auto_fix_rate: f64,
    /// dispatched / terminal sessions.
    pub success_rate: f64,
}

/// Compute the projection over a session snapshot.
pub fn compute(sessions: &[Session]) -> TriageMetrics {
    let mut m = TriageMetrics {
        sessions_total: sessions.len(),
        ..Default::default()
    };

    for session in sessions {
        match session.status {
            SessionStatus::Dispatched => m.dispatched += 1,
            SessionStatus::Failed => m.failed += 1,
            SessionStatus::Rejected => m.rejected += 1,
            SessionStatus::AwaitingApproval => m.awaiting_approval += 1,
            _ => {}
        }
        match session.decision {
            Some(Decision::AutoFix) if session.status == SessionStatus::Dispatched => {
                m.auto_fixed += 1;
            }
            Some(Decision::ForceEscalate) => m.escalated += 1,
            _ => {}
        }
    }

    if m.dispatched > 0 {
        m.auto_fix_rate = m.auto_fixed as f64 / m.dispatched as f64;
    }
    let terminal = m.dispatched + m.failed + m.rejected;
    if terminal > 0 {
        m.success_rate = m.dispatched as f64 / terminal as f64;
    }
    m
}
