//! Session lifecycle and persistence.
//!
//! This module owns everything about a session's life:
//!
//! - `state`: the status enum, legal-transition guard table, and the
//!   [`StateMachine`](state::StateMachine) the orchestrator drives
//! - `types`: the [`Session`](types::Session) record and its summaries
//! - `store`: the thread-safe store with JSON write-through persistence
//!
//! A session is created on submit, advanced stage by stage, optionally
//! parked at `awaiting_approval`, and frozen at a terminal state. The
//! store persists every transition so suspended sessions survive process
//! restarts.

pub mod state;
pub mod store;
pub mod types;

// Re-export core types
pub use state::{
    is_legal_transition, IllegalTransition, SessionStatus, StateMachine, TransitionRecord,
};
pub use store::{SessionStore, StoreError, StoreResult};
pub use types::{
    ApprovalResolution, Session, SessionError, SessionErrorKind, SessionId, SessionSummary,
};
