//! Agent layer for the commerce-migration triage assistant.
//!
//! This crate provides:
//! - The pipeline orchestrator driving sessions through the triage stages
//! - The knowledge store trait with in-memory and no-op backends
//! - Diagnoser clients: OpenAI-compatible HTTP and an offline heuristic
//! - Fail-closed contracts for model payloads
//! - Explanation rendering and incident write-back
//! - The `TriageService` facade used by the CLI binary
//!
//! Deterministic triage rules (clustering, risk, decision gate, session
//! lifecycle) live in the `triage-core` crate; this crate wires them to
//! the model endpoint, the knowledge store, and the outside world.

pub mod config;
pub mod contracts;
pub mod diagnoser;
pub mod explain;
pub mod knowledge;
pub mod learning;
pub mod orchestrator;
pub mod service;

// Re-export key configuration types
pub use config::{check_endpoint, TriageConfig};

// Re-export key knowledge types
pub use knowledge::{
    InMemoryKnowledgeStore, KnowledgeStore, NoOpKnowledgeStore, ScoredDocument, StoredDocument,
    SEARCH_COLLECTIONS,
};

// Re-export key diagnoser types
pub use diagnoser::{
    DiagnosisContext, Diagnoser, FixContext, HeuristicDiagnoser, HttpDiagnoser,
};

// Re-export contract parsing
pub use contracts::{parse_diagnosis, parse_fix, ContractViolation};

// Re-export pipeline types
pub use orchestrator::{PipelineError, PipelineOrchestrator};

// Re-export service types
pub use service::{ServiceError, TriageService};

// Re-export explanation and learning helpers
pub use explain::render_explanation;
pub use learning::LearningSync;
