//! Session lifecycle — explicit states and legal transition guards.
//!
//! Provides a typed state model for the triage pipeline so that:
//! 1. Every stage transition is auditable and logged.
//! 2. Illegal transitions are caught by `advance()` guards.
//! 3. A persisted session can reconstruct its exact stage history.
//!
//! The orchestrator calls `advance()` to move between stages. Each call
//! validates the transition is legal and records it in the transition log.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The set of session lifecycle states.
///
/// Every session starts at `Created` and terminates at `Dispatched`,
/// `Failed`, or `Rejected`. `AwaitingApproval` is the single suspension
/// point: the pipeline parks there and resumes only via an external
/// resolve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session row initialized with the input reports.
    Created,
    /// Validating and normalizing the report batch.
    Observing,
    /// Grouping reports into the dominant pattern cluster.
    Clustering,
    /// Querying the knowledge store with the cluster summary.
    Searching,
    /// Calling the diagnoser for a root-cause hypothesis.
    Diagnosing,
    /// Applying the risk rule table.
    RiskAssessing,
    /// Applying the auto-fix/approval gate.
    Deciding,
    /// Generating the fix for an auto-fix decision.
    AutoFixing,
    /// Parked in the approval queue — the suspension point.
    AwaitingApproval,
    /// Approved force-escalation being handed to engineering.
    Escalated,
    /// Rendering the human-readable explanation.
    Explaining,
    /// Writing the outcome back to the knowledge store.
    Learning,
    /// Terminal success.
    Dispatched,
    /// Terminal failure.
    Failed,
    /// Reviewer rejected the proposed action — terminal.
    Rejected,
}

impl SessionStatus {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Dispatched | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Observing => "observing",
            Self::Clustering => "clustering",
            Self::Searching => "searching",
            Self::Diagnosing => "diagnosing",
            Self::RiskAssessing => "risk_assessing",
            Self::Deciding => "deciding",
            Self::AutoFixing => "auto_fixing",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Escalated => "escalated",
            Self::Explaining => "explaining",
            Self::Learning => "learning",
            Self::Dispatched => "dispatched",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Legal transitions between session states.
///
/// The transition table encodes the valid edges in the stage graph:
/// ```text
/// Created → Observing | Failed
/// Observing → Clustering | Failed
/// Clustering → Searching | Failed
/// Searching → Diagnosing | Failed
/// Diagnosing → RiskAssessing | Failed
/// RiskAssessing → Deciding | Failed
/// Deciding → AutoFixing | AwaitingApproval | Failed
/// AutoFixing → Explaining | Failed
/// AwaitingApproval → Escalated | Explaining | Rejected | Failed
/// Escalated → Explaining | Failed
/// Explaining → Learning | Failed
/// Learning → Dispatched | Failed
/// ```
pub fn is_legal_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;

    // Any non-terminal state can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Created, Observing)
            | (Observing, Clustering)
            | (Clustering, Searching)
            | (Searching, Diagnosing)
            | (Diagnosing, RiskAssessing)
            | (RiskAssessing, Deciding)
            // The one conditional fan-out: unattended fix or human review
            | (Deciding, AutoFixing)
            | (Deciding, AwaitingApproval)
            | (AutoFixing, Explaining)
            // Resume after resolve: approve continues, reject terminates
            | (AwaitingApproval, Escalated)
            | (AwaitingApproval, Explaining)
            | (AwaitingApproval, Rejected)
            | (Escalated, Explaining)
            | (Explaining, Learning)
            | (Learning, Dispatched)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The state transitioned from.
    pub from: SessionStatus,
    /// The state transitioned to.
    pub to: SessionStatus,
    /// Wall-clock time of the transition.
    pub at: DateTime<Utc>,
    /// Milliseconds since this machine was created (per run, not per
    /// session — a resumed session starts a fresh machine).
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The pipeline state machine.
///
/// Tracks the current state, enforces legal transitions, and maintains a
/// log of the transitions it performed for the session audit trail.
pub struct StateMachine {
    current: SessionStatus,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Created`.
    pub fn new() -> Self {
        Self::resume(SessionStatus::Created)
    }

    /// Create a state machine for a session already at `state`, as when
    /// resuming a suspended session from the approval surface.
    pub fn resume(state: SessionStatus) -> Self {
        Self {
            current: state,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    /// Get the current state.
    pub fn current(&self) -> SessionStatus {
        self.current
    }

    /// Attempt to advance to the next state.
    ///
    /// Returns `Ok(())` if the transition is legal, or
    /// `Err(IllegalTransition)` if it would violate the stage graph.
    pub fn advance(
        &mut self,
        to: SessionStatus,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            at: Utc::now(),
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, "State transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    ///
    /// Convenience method — always legal from non-terminal states.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(SessionStatus::Failed, Some(reason))
    }

    /// Whether the state machine is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition log for this run.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// The most recent transition, if any.
    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.transitions.last()
    }

    /// Get a summary string of this run's history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        format!(
            "{} ({}ms, {} transitions)",
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        ) + if states.is_empty() {
            String::new()
        } else {
            format!(" [{}]", states.join(" → "))
        }
        .as_str()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), SessionStatus::Created);
        assert!(!sm.is_terminal());
        assert_eq!(sm.transitions().len(), 0);
    }

    #[test]
    fn test_auto_fix_path_transitions() {
        let mut sm = StateMachine::new();

        sm.advance(SessionStatus::Observing, None).unwrap();
        sm.advance(SessionStatus::Clustering, None).unwrap();
        sm.advance(SessionStatus::Searching, None).unwrap();
        sm.advance(SessionStatus::Diagnosing, None).unwrap();
        sm.advance(SessionStatus::RiskAssessing, None).unwrap();
        sm.advance(SessionStatus::Deciding, None).unwrap();
        sm.advance(SessionStatus::AutoFixing, Some("low risk, confident"))
            .unwrap();
        sm.advance(SessionStatus::Explaining, None).unwrap();
        sm.advance(SessionStatus::Learning, None).unwrap();
        sm.advance(SessionStatus::Dispatched, None).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.current(), SessionStatus::Dispatched);
        assert_eq!(sm.transitions().len(), 10);
    }

    #[test]
    fn test_approval_path_suspends_then_resumes() {
        let mut sm = StateMachine::new();
        sm.advance(SessionStatus::Observing, None).unwrap();
        sm.advance(SessionStatus::Clustering, None).unwrap();
        sm.advance(SessionStatus::Searching, None).unwrap();
        sm.advance(SessionStatus::Diagnosing, None).unwrap();
        sm.advance(SessionStatus::RiskAssessing, None).unwrap();
        sm.advance(SessionStatus::Deciding, None).unwrap();
        sm.advance(SessionStatus::AwaitingApproval, Some("requires approval"))
            .unwrap();
        assert!(!sm.is_terminal());

        // Resume happens on a fresh machine seeded from the stored status.
        let mut resumed = StateMachine::resume(SessionStatus::AwaitingApproval);
        resumed
            .advance(SessionStatus::Explaining, Some("approved"))
            .unwrap();
        resumed.advance(SessionStatus::Learning, None).unwrap();
        resumed.advance(SessionStatus::Dispatched, None).unwrap();
        assert!(resumed.is_terminal());
    }

    #[test]
    fn test_escalated_path_after_approval() {
        let mut sm = StateMachine::resume(SessionStatus::AwaitingApproval);
        sm.advance(SessionStatus::Escalated, Some("force escalation approved"))
            .unwrap();
        sm.advance(SessionStatus::Explaining, None).unwrap();
        sm.advance(SessionStatus::Learning, None).unwrap();
        sm.advance(SessionStatus::Dispatched, None).unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_rejection_is_terminal() {
        let mut sm = StateMachine::resume(SessionStatus::AwaitingApproval);
        sm.advance(SessionStatus::Rejected, Some("reviewer rejected"))
            .unwrap();
        assert!(sm.is_terminal());
        assert!(sm.advance(SessionStatus::Explaining, None).is_err());
    }

    #[test]
    fn test_rejected_only_reachable_from_awaiting_approval() {
        for state in [
            SessionStatus::Created,
            SessionStatus::Observing,
            SessionStatus::Deciding,
            SessionStatus::AutoFixing,
            SessionStatus::Explaining,
            SessionStatus::Learning,
        ] {
            assert!(
                !is_legal_transition(state, SessionStatus::Rejected),
                "{state} must not reach rejected"
            );
        }
        assert!(is_legal_transition(
            SessionStatus::AwaitingApproval,
            SessionStatus::Rejected
        ));
    }

    #[test]
    fn test_failure_from_any_non_terminal_state() {
        for state in [
            SessionStatus::Created,
            SessionStatus::Observing,
            SessionStatus::Clustering,
            SessionStatus::Searching,
            SessionStatus::Diagnosing,
            SessionStatus::RiskAssessing,
            SessionStatus::Deciding,
            SessionStatus::AutoFixing,
            SessionStatus::AwaitingApproval,
            SessionStatus::Escalated,
            SessionStatus::Explaining,
            SessionStatus::Learning,
        ] {
            let mut sm = StateMachine::resume(state);
            assert!(sm.fail("test failure").is_ok());
            assert_eq!(sm.current(), SessionStatus::Failed);
            assert!(sm.is_terminal());
        }
    }

    #[test]
    fn test_cannot_transition_from_terminal() {
        for state in [
            SessionStatus::Dispatched,
            SessionStatus::Failed,
            SessionStatus::Rejected,
        ] {
            let mut sm = StateMachine::resume(state);
            let err = sm.advance(SessionStatus::Observing, None).unwrap_err();
            assert_eq!(err.from, state);
            assert!(sm.fail("nope").is_err());
        }
    }

    #[test]
    fn test_illegal_skip_transition() {
        let mut sm = StateMachine::new();

        // Can't jump straight to Diagnosing without the earlier stages.
        let err = sm.advance(SessionStatus::Diagnosing, None).unwrap_err();
        assert_eq!(err.from, SessionStatus::Created);
        assert_eq!(err.to, SessionStatus::Diagnosing);
    }

    #[test]
    fn test_illegal_backward_transition() {
        let mut sm = StateMachine::new();
        sm.advance(SessionStatus::Observing, None).unwrap();
        sm.advance(SessionStatus::Clustering, None).unwrap();

        assert!(sm.advance(SessionStatus::Observing, None).is_err());
    }

    #[test]
    fn test_auto_fixing_cannot_enter_approval() {
        assert!(!is_legal_transition(
            SessionStatus::AutoFixing,
            SessionStatus::AwaitingApproval
        ));
        assert!(!is_legal_transition(
            SessionStatus::AutoFixing,
            SessionStatus::Escalated
        ));
    }

    #[test]
    fn test_transition_record_has_reason() {
        let mut sm = StateMachine::new();
        sm.advance(SessionStatus::Observing, Some("3 reports received"))
            .unwrap();

        let record = &sm.transitions()[0];
        assert_eq!(record.from, SessionStatus::Created);
        assert_eq!(record.to, SessionStatus::Observing);
        assert_eq!(record.reason.as_deref(), Some("3 reports received"));
    }

    #[test]
    fn test_transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: SessionStatus::Deciding,
            to: SessionStatus::AwaitingApproval,
            at: Utc::now(),
            elapsed_ms: 12345,
            reason: Some("high tier".into()),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("awaiting_approval"));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.from, SessionStatus::Deciding);
        assert_eq!(restored.to, SessionStatus::AwaitingApproval);
        assert_eq!(restored.elapsed_ms, 12345);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::RiskAssessing.to_string(), "risk_assessing");
        assert_eq!(
            SessionStatus::AwaitingApproval.to_string(),
            "awaiting_approval"
        );
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(SessionStatus::Observing, None).unwrap();
        sm.fail("test").unwrap();
        let summary = sm.summary();
        assert!(summary.contains("failed"));
        assert!(summary.contains("2 transitions"));
    }
}
