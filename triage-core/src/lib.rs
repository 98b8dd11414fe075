//! Triage Pipeline Core
//!
//! This library provides the deterministic heart of the support-ticket
//! triage assistant:
//!
//! - Report model and batch validation
//! - Cluster engine with volume-spike and abnormal-pattern detection
//! - Risk rule table and the auto-fix/approval decision gate
//! - Session lifecycle state machine with legal-transition guards
//! - Thread-safe session store with JSON write-through persistence
//! - Approval queue for sessions suspended pending human sign-off
//! - Metrics computed as a read-only projection over stored sessions
//!
//! Everything here is synchronous and free of I/O beyond the session
//! store's persistence; the collaborating knowledge store and diagnoser
//! live in the agents crate that drives this core.

pub mod action;
pub mod approval;
pub mod cluster;
pub mod decision;
pub mod diagnosis;
pub mod metrics;
pub mod report;
pub mod risk;
pub mod session;

// Re-export key report types
pub use report::{validate_batch, MigrationStage, Priority, Report};

// Re-export key cluster types
pub use cluster::{
    Cluster, ClusterEngine, DEFAULT_FAILURE_SIGNATURES, DEFAULT_VOLUME_SPIKE_THRESHOLD,
};

// Re-export diagnosis types
pub use diagnosis::{root_cause, Diagnosis, DocumentRef};

// Re-export risk types
pub use risk::{
    RiskAssessment, RiskAssessor, RiskTier, DEFAULT_CHECKOUT_KEYWORDS, DEFAULT_PAYMENT_CATEGORIES,
    DEFAULT_REVENUE_KEYWORDS,
};

// Re-export decision types
pub use decision::{Decision, DecisionPolicy, DEFAULT_AUTO_FIX_CONFIDENCE};

// Re-export action types
pub use action::{kind_for_root_cause, ActionKind, ProposedAction};

// Re-export session lifecycle types
pub use session::{
    is_legal_transition, ApprovalResolution, IllegalTransition, Session, SessionError,
    SessionErrorKind, SessionId, SessionStatus, SessionStore, SessionSummary, StateMachine,
    StoreError, StoreResult, TransitionRecord,
};

// Re-export approval queue types
pub use approval::{ApprovalError, ApprovalQueue, QueueEntry, Resolution};

// Re-export metrics types
pub use metrics::TriageMetrics;
