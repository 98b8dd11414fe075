//! Pipeline orchestrator: drives a session through the triage stages.
//!
//! Each stage transition goes through the session's state machine and is
//! persisted before the stage's work begins, so a crash leaves an accurate
//! trail. Knowledge lookups degrade to empty results on failure; diagnoser
//! failures are fatal to the session. Sessions that need human sign-off are
//! parked in the approval queue and picked back up by [`PipelineOrchestrator::resume`].

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use triage_core::session::{
    ApprovalResolution, IllegalTransition, Session, SessionErrorKind, SessionStatus, SessionStore,
    StateMachine, StoreError,
};
use triage_core::{
    validate_batch, ActionKind, ApprovalError, ApprovalQueue, Cluster, ClusterEngine, Decision,
    DecisionPolicy, Diagnosis, ProposedAction, QueueEntry, Report, RiskAssessor,
};

use crate::config::TriageConfig;
use crate::contracts::{parse_diagnosis, parse_fix};
use crate::diagnoser::{DiagnosisContext, Diagnoser, FixContext};
use crate::explain::render_explanation;
use crate::knowledge::{KnowledgeStore, ScoredDocument, SEARCH_COLLECTIONS};
use crate::learning::LearningSync;

/// Reports included verbatim in the diagnosis prompt.
const MAX_SAMPLE_REPORTS: usize = 3;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Observation dropped every submitted report.
    #[error("no valid reports in batch: {detail}")]
    Validation { detail: String },

    /// The diagnoser failed, timed out, or returned an unusable payload.
    #[error("diagnosis failed: {detail}")]
    DiagnosisFailed { detail: String },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] ApprovalError),
}

/// Drives sessions from `Created` to a terminal state.
///
/// Holds the shared store and approval queue plus the deterministic engines
/// built from configuration. Cloneable so the service can hand one to each
/// spawned run.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    store: Arc<SessionStore>,
    queue: Arc<ApprovalQueue>,
    kb: Arc<dyn KnowledgeStore>,
    diagnoser: Arc<dyn Diagnoser>,
    config: TriageConfig,
    cluster_engine: ClusterEngine,
    risk_assessor: RiskAssessor,
    decision_policy: DecisionPolicy,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        queue: Arc<ApprovalQueue>,
        kb: Arc<dyn KnowledgeStore>,
        diagnoser: Arc<dyn Diagnoser>,
        config: TriageConfig,
    ) -> Self {
        Self {
            cluster_engine: config.cluster_engine(),
            risk_assessor: config.risk_assessor(),
            decision_policy: config.decision_policy(),
            store,
            queue,
            kb,
            diagnoser,
            config,
        }
    }

    /// Run the pipeline for a freshly created session.
    ///
    /// Returns the session in its resting state: `Dispatched` when an
    /// auto-fix went out, `AwaitingApproval` when the session was parked
    /// for review. Failures are recorded on the session before the error
    /// is returned.
    pub async fn run(&self, session_id: &str) -> Result<Session, PipelineError> {
        let session = self.load(session_id)?;
        let mut machine = StateMachine::resume(session.status);
        let submitted = session.reports.len();

        // Observe: normalize the batch, drop unusable reports.
        self.enter(&mut machine, session_id, SessionStatus::Observing, None)?;
        let (valid, warnings) = validate_batch(session.reports);
        let session = self.store.update(session_id, move |s| {
            s.reports = valid;
            s.warnings.extend(warnings);
        })?;
        if session.reports.is_empty() {
            let detail = format!("all {submitted} submitted reports were dropped during observation");
            self.fail_session(&mut machine, session_id, SessionErrorKind::Validation, &detail);
            return Err(PipelineError::Validation { detail });
        }
        debug!(
            session_id = %session_id,
            kept = session.reports.len(),
            submitted,
            "Report batch observed"
        );

        // Cluster: find the dominant pattern and its anomaly flags.
        self.enter(&mut machine, session_id, SessionStatus::Clustering, None)?;
        let cluster = self.cluster_engine.cluster(&session.reports);
        info!(
            session_id = %session_id,
            label = %cluster.label,
            count = cluster.count,
            volume_spike = cluster.volume_spike,
            abnormal_pattern = cluster.abnormal_pattern,
            "Clustered report batch"
        );
        let sample = sample_text(&session.reports, &cluster);
        let session = self.store.update(session_id, {
            let cluster = cluster.clone();
            move |s| s.cluster = Some(cluster)
        })?;

        // Search: gather context from every collection, tolerating outages.
        self.enter(&mut machine, session_id, SessionStatus::Searching, None)?;
        let query = format!("{} {}", cluster.label, sample);
        let (evidence, search_warnings) = self.search_knowledge(&query).await;
        if !search_warnings.is_empty() {
            self.store
                .update(session_id, move |s| s.warnings.extend(search_warnings))?;
        }

        // Diagnose: the only model round-trip on the main path.
        self.enter(&mut machine, session_id, SessionStatus::Diagnosing, None)?;
        let context = DiagnosisContext {
            cluster_label: cluster.label.clone(),
            report_count: cluster.count,
            sample_text: sample,
            evidence: evidence.clone(),
        };
        let raw = match timeout(self.config.diagnoser_timeout(), self.diagnoser.diagnose(&context))
            .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                let detail = format!("diagnoser call failed: {e}");
                self.fail_session(
                    &mut machine,
                    session_id,
                    SessionErrorKind::DiagnosisFailed,
                    &detail,
                );
                return Err(PipelineError::DiagnosisFailed { detail });
            }
            Err(_) => {
                let detail = format!(
                    "diagnoser timed out after {}s",
                    self.config.diagnoser_timeout_secs
                );
                self.fail_session(
                    &mut machine,
                    session_id,
                    SessionErrorKind::DiagnosisFailed,
                    &detail,
                );
                return Err(PipelineError::DiagnosisFailed { detail });
            }
        };
        let diagnosis = match parse_diagnosis(&raw) {
            Ok(diagnosis) => diagnosis,
            Err(violation) => {
                let detail = format!("unusable diagnosis payload: {violation}");
                self.fail_session(
                    &mut machine,
                    session_id,
                    SessionErrorKind::DiagnosisFailed,
                    &detail,
                );
                return Err(PipelineError::DiagnosisFailed { detail });
            }
        };
        let diagnosis = diagnosis.with_evidence(evidence.iter().map(|d| d.to_ref()).collect());
        info!(
            session_id = %session_id,
            root_cause = %diagnosis.root_cause,
            confidence = diagnosis.confidence,
            "Diagnosis recorded"
        );
        self.store.update(session_id, {
            let diagnosis = diagnosis.clone();
            move |s| s.diagnosis = Some(diagnosis)
        })?;

        // Risk-assess and decide, both deterministic rule tables.
        self.enter(&mut machine, session_id, SessionStatus::RiskAssessing, None)?;
        let risk = self.risk_assessor.assess(&diagnosis, &cluster);
        info!(
            session_id = %session_id,
            tier = %risk.tier,
            affects_checkout = risk.affects_checkout,
            affects_revenue = risk.affects_revenue,
            "Risk assessed"
        );
        self.store.update(session_id, move |s| s.risk = Some(risk))?;

        self.enter(&mut machine, session_id, SessionStatus::Deciding, None)?;
        let decision = self.decision_policy.decide(&risk, &diagnosis);
        self.store
            .update(session_id, move |s| s.set_decision(decision))?;

        match decision {
            Decision::AutoFix => {
                self.enter(
                    &mut machine,
                    session_id,
                    SessionStatus::AutoFixing,
                    Some("confidence above auto-fix threshold"),
                )?;
                let action = match self.generate_auto_fix(&cluster, &diagnosis).await {
                    Ok(action) => action,
                    Err(detail) => {
                        self.fail_session(
                            &mut machine,
                            session_id,
                            SessionErrorKind::DiagnosisFailed,
                            &detail,
                        );
                        return Err(PipelineError::DiagnosisFailed { detail });
                    }
                };
                self.store
                    .update(session_id, move |s| s.action = Some(action))?;
                self.finish(&mut machine, session_id).await
            }
            Decision::RequiresApproval | Decision::ForceEscalate => {
                let reason = if decision == Decision::ForceEscalate {
                    "anomaly flags force escalation"
                } else {
                    "confidence or risk requires human sign-off"
                };
                let action = ProposedAction::draft(&diagnosis, decision);
                self.store
                    .update(session_id, move |s| s.action = Some(action))?;
                let session = self.enter(
                    &mut machine,
                    session_id,
                    SessionStatus::AwaitingApproval,
                    Some(reason),
                )?;
                self.queue.enqueue(QueueEntry::from_session(&session))?;
                info!(session_id = %session_id, decision = %decision, "Session parked for approval");
                Ok(session)
            }
        }
    }

    /// Resume a parked session after its queue entry was resolved.
    ///
    /// Rejection terminates the session. Approval routes force-escalated
    /// sessions through `Escalated`, then both approval shapes share the
    /// explain / learn / dispatch tail.
    pub async fn resume(
        &self,
        session_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<Session, PipelineError> {
        let session = self.load(session_id)?;
        let mut machine = StateMachine::resume(session.status);
        let decision = session.decision;

        let resolution = ApprovalResolution {
            approved,
            notes,
            resolved_at: Utc::now(),
        };
        self.store
            .update(session_id, move |s| s.resolution = Some(resolution))?;

        if !approved {
            let session = self.enter(
                &mut machine,
                session_id,
                SessionStatus::Rejected,
                Some("reviewer rejected the proposed action"),
            )?;
            info!(session_id = %session_id, "Session rejected by reviewer");
            return Ok(session);
        }

        if decision == Some(Decision::ForceEscalate) {
            self.enter(
                &mut machine,
                session_id,
                SessionStatus::Escalated,
                Some("escalation acknowledged by reviewer"),
            )?;
            info!(session_id = %session_id, "Escalation acknowledged — handing off to the platform team");
        }

        self.finish(&mut machine, session_id).await
    }

    /// Shared tail: explain, learn, dispatch.
    async fn finish(
        &self,
        machine: &mut StateMachine,
        session_id: &str,
    ) -> Result<Session, PipelineError> {
        let session = self.enter(machine, session_id, SessionStatus::Explaining, None)?;
        let explanation = render_explanation(&session);
        self.store
            .update(session_id, move |s| s.explanation = Some(explanation))?;

        let session = self.enter(machine, session_id, SessionStatus::Learning, None)?;
        let sync = LearningSync::new(self.kb.as_ref());
        if timeout(self.config.kb_timeout(), sync.record(&session))
            .await
            .is_err()
        {
            warn!(session_id = %session_id, "Incident write-back timed out (non-fatal)");
        }

        let session = self.enter(
            machine,
            session_id,
            SessionStatus::Dispatched,
            Some("triage complete"),
        )?;
        info!(session_id = %session_id, "Session dispatched");
        Ok(session)
    }

    /// Query every collection, trading failures for warnings.
    async fn search_knowledge(&self, query: &str) -> (Vec<ScoredDocument>, Vec<String>) {
        let mut evidence = Vec::new();
        let mut warnings = Vec::new();

        for &collection in SEARCH_COLLECTIONS {
            match timeout(
                self.config.kb_timeout(),
                self.kb.query(collection, query, self.config.search_top_k),
            )
            .await
            {
                Ok(Ok(docs)) => {
                    debug!(collection, hits = docs.len(), "Knowledge query returned");
                    evidence.extend(docs);
                }
                Ok(Err(e)) => {
                    warn!(collection, error = %e, "Knowledge query failed — proceeding without context");
                    warnings.push(format!("knowledge lookup failed for {collection}: {e}"));
                }
                Err(_) => {
                    warn!(collection, "Knowledge query timed out — proceeding without context");
                    warnings.push(format!("knowledge lookup timed out for {collection}"));
                }
            }
        }

        evidence.sort_by(|a, b| b.score.total_cmp(&a.score));
        (evidence, warnings)
    }

    /// Generate and validate the auto-fix payload. Any deviation from the
    /// contract fails the session rather than dispatching a doubtful fix.
    async fn generate_auto_fix(
        &self,
        cluster: &Cluster,
        diagnosis: &Diagnosis,
    ) -> Result<ProposedAction, String> {
        let context = FixContext {
            cluster_label: cluster.label.clone(),
            root_cause: diagnosis.root_cause.clone(),
            confidence: diagnosis.confidence,
            reasoning: diagnosis.reasoning.clone(),
        };
        let raw = match timeout(
            self.config.diagnoser_timeout(),
            self.diagnoser.generate_fix(&context),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(format!("fix generation failed: {e}")),
            Err(_) => {
                return Err(format!(
                    "fix generation timed out after {}s",
                    self.config.diagnoser_timeout_secs
                ))
            }
        };
        let action = parse_fix(&raw).map_err(|violation| format!("unusable fix payload: {violation}"))?;
        if action.kind != ActionKind::AutoFix {
            return Err(format!(
                "fix generator proposed '{}' on the auto-fix path",
                action.kind
            ));
        }
        Ok(action)
    }

    fn load(&self, session_id: &str) -> Result<Session, PipelineError> {
        self.store.get(session_id)?.ok_or_else(|| {
            PipelineError::Store(StoreError::NotFound {
                id: session_id.to_string(),
            })
        })
    }

    /// Advance the state machine and persist the transition record.
    fn enter(
        &self,
        machine: &mut StateMachine,
        session_id: &str,
        to: SessionStatus,
        reason: Option<&str>,
    ) -> Result<Session, PipelineError> {
        machine.advance(to, reason)?;
        let record = machine.last_transition().cloned();
        let session = self.store.update(session_id, move |s| {
            if let Some(record) = record {
                s.record_transition(record);
            }
        })?;
        Ok(session)
    }

    /// Move the machine to `Failed` and record the error on the session.
    fn fail_session(
        &self,
        machine: &mut StateMachine,
        session_id: &str,
        kind: SessionErrorKind,
        detail: &str,
    ) {
        warn!(session_id = %session_id, detail, "Session failed");
        if machine.fail(detail).is_err() {
            return;
        }
        let record = machine.last_transition().cloned();
        let message = detail.to_string();
        if let Err(e) = self.store.update(session_id, move |s| {
            if let Some(record) = record {
                s.record_transition(record);
            }
            s.set_error(kind, message);
        }) {
            warn!(session_id = %session_id, error = %e, "Failed to persist session failure");
        }
    }
}

/// Up to [`MAX_SAMPLE_REPORTS`] member reports rendered for the diagnoser.
fn sample_text(reports: &[Report], cluster: &Cluster) -> String {
    cluster
        .member_ids
        .iter()
        .take(MAX_SAMPLE_REPORTS)
        .filter_map(|id| reports.iter().find(|r| &r.id == id))
        .map(|r| format!("{}: {}", r.subject, r.description))
        .collect::<Vec<_>>()
        .join("\n")
}
