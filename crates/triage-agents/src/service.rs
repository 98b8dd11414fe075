//! Service facade: session intake, approval resolution, queue recovery.
//!
//! Owns the shared store and approval queue and hands clones of the
//! orchestrator to background runs. The approval queue is rebuilt from
//! persisted sessions at startup, so parked sessions survive a restart.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use triage_core::metrics::{self, TriageMetrics};
use triage_core::session::{
    Session, SessionId, SessionStatus, SessionStore, SessionSummary, StoreError,
};
use triage_core::{ApprovalError, ApprovalQueue, QueueEntry, Report};

use crate::config::TriageConfig;
use crate::diagnoser::Diagnoser;
use crate::knowledge::KnowledgeStore;
use crate::orchestrator::{PipelineError, PipelineOrchestrator};

/// Errors surfaced to service callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("session {id} was already resolved")]
    AlreadyResolved { id: String },

    /// Resolution attempted against a session that is not parked.
    #[error("session {id} is not awaiting approval (status: {status})")]
    InvalidState { id: String, status: SessionStatus },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] ApprovalError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Long-lived entry point for submitting and steering triage sessions.
///
/// Cheap to clone; all state lives behind `Arc`.
#[derive(Clone)]
pub struct TriageService {
    store: Arc<SessionStore>,
    queue: Arc<ApprovalQueue>,
    orchestrator: PipelineOrchestrator,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TriageService {
    /// Build the service, loading persisted sessions when the config names
    /// a state directory and re-parking any that were awaiting approval.
    pub fn new(
        config: TriageConfig,
        kb: Arc<dyn KnowledgeStore>,
        diagnoser: Arc<dyn Diagnoser>,
    ) -> Result<Self, ServiceError> {
        let store = Arc::new(match &config.state_dir {
            Some(dir) => SessionStore::with_state_dir(dir)?,
            None => SessionStore::new(),
        });

        let queue = Arc::new(ApprovalQueue::new());
        for session in store.awaiting_approval()? {
            queue.enqueue(QueueEntry::from_session(&session))?;
        }
        if queue.pending_count() > 0 {
            info!(
                pending = queue.pending_count(),
                "Rebuilt approval queue from persisted sessions"
            );
        }

        let orchestrator =
            PipelineOrchestrator::new(store.clone(), queue.clone(), kb, diagnoser, config);

        Ok(Self {
            store,
            queue,
            orchestrator,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Create a session and run the pipeline in the background.
    ///
    /// Returns the session id immediately; outcomes land on the stored
    /// session. Run failures are recorded there too, so they are only
    /// logged here.
    pub fn submit(&self, reports: Vec<Report>) -> Result<SessionId, ServiceError> {
        let session = Session::new(reports);
        let id = session.id.clone();
        self.store.insert(session)?;
        info!(session_id = %id, "Session submitted");

        let orchestrator = self.orchestrator.clone();
        let cancel = self.cancel.clone();
        let run_id = id.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(session_id = %run_id, "Shutdown before the run completed");
                }
                result = orchestrator.run(&run_id) => {
                    if let Err(e) = result {
                        warn!(session_id = %run_id, error = %e, "Pipeline run ended in failure");
                    }
                }
            }
        });

        Ok(id)
    }

    /// Create a session and run the pipeline to its resting state inline.
    pub async fn submit_and_wait(&self, reports: Vec<Report>) -> Result<Session, ServiceError> {
        let session = Session::new(reports);
        let id = session.id.clone();
        self.store.insert(session)?;
        info!(session_id = %id, "Session submitted");
        Ok(self.orchestrator.run(&id).await?)
    }

    /// Resolve a parked session and resume its pipeline.
    pub async fn resolve_approval(
        &self,
        session_id: &str,
        approved: bool,
        notes: Option<String>,
    ) -> Result<Session, ServiceError> {
        let session = self
            .store
            .get(session_id)?
            .ok_or_else(|| ServiceError::NotFound {
                id: session_id.to_string(),
            })?;
        if session.resolution.is_some() {
            return Err(ServiceError::AlreadyResolved {
                id: session_id.to_string(),
            });
        }
        if session.status != SessionStatus::AwaitingApproval {
            return Err(ServiceError::InvalidState {
                id: session_id.to_string(),
                status: session.status,
            });
        }

        self.queue.resolve(session_id, approved, notes.clone())?;
        Ok(self.orchestrator.resume(session_id, approved, notes).await?)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, ServiceError> {
        self.store
            .get(session_id)?
            .ok_or_else(|| ServiceError::NotFound {
                id: session_id.to_string(),
            })
    }

    /// Queue entries still waiting for a reviewer.
    pub fn pending(&self) -> Result<Vec<QueueEntry>, ServiceError> {
        Ok(self.queue.list_pending()?)
    }

    /// Most recently touched sessions, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<SessionSummary>, ServiceError> {
        let mut sessions = self.store.list()?;
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions
            .into_iter()
            .take(limit)
            .map(|s| s.summary())
            .collect())
    }

    /// Aggregate figures recomputed from the store.
    pub fn metrics(&self) -> Result<TriageMetrics, ServiceError> {
        Ok(metrics::compute(&self.store.list()?))
    }

    /// Stop background runs at their next await point and wait for them.
    pub async fn shutdown(&self) {
        info!("Shutdown requested");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnoser::HeuristicDiagnoser;
    use crate::knowledge::InMemoryKnowledgeStore;
    use std::time::Duration;
    use triage_core::{
        ActionKind, Decision, MigrationStage, Priority, DEFAULT_CHECKOUT_KEYWORDS,
        DEFAULT_FAILURE_SIGNATURES, DEFAULT_PAYMENT_CATEGORIES, DEFAULT_REVENUE_KEYWORDS,
    };

    fn to_vec(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn test_config() -> TriageConfig {
        TriageConfig {
            model_url: "http://127.0.0.1:9".to_string(),
            model_name: "test-model".to_string(),
            volume_spike_threshold: 50,
            auto_fix_confidence: 0.85,
            search_top_k: 3,
            diagnoser_timeout_secs: 30,
            kb_timeout_secs: 5,
            state_dir: None,
            failure_signatures: to_vec(DEFAULT_FAILURE_SIGNATURES),
            payment_categories: to_vec(DEFAULT_PAYMENT_CATEGORIES),
            checkout_keywords: to_vec(DEFAULT_CHECKOUT_KEYWORDS),
            revenue_keywords: to_vec(DEFAULT_REVENUE_KEYWORDS),
        }
    }

    fn service_with(config: TriageConfig) -> TriageService {
        TriageService::new(
            config,
            Arc::new(InMemoryKnowledgeStore::new()),
            Arc::new(HeuristicDiagnoser),
        )
        .unwrap()
    }

    fn service() -> TriageService {
        service_with(test_config())
    }

    /// Dense misconfiguration vocabulary pushes the heuristic diagnoser
    /// above the auto-fix threshold.
    fn misconfig_reports() -> Vec<Report> {
        vec![
            Report::new(
                "r-1",
                "merchant-12",
                "Webhook callback settings rejected",
                "The webhook callback settings show an expired credential and the endpoint is not configured",
                MigrationStage::MidMigration,
                Priority::Medium,
            ),
            Report::new(
                "r-2",
                "merchant-12",
                "Webhook callback settings errors",
                "Expired credential in the callback settings, endpoint not configured after the update",
                MigrationStage::MidMigration,
                Priority::Medium,
            ),
        ]
    }

    /// A how-to question with sparse signals parks at medium confidence.
    fn docs_reports() -> Vec<Report> {
        vec![Report::new(
            "r-9",
            "merchant-3",
            "Theme builder question",
            "How do I enable custom fonts? The guide is unclear on this point",
            MigrationStage::PreMigration,
            Priority::Low,
        )]
    }

    async fn wait_terminal(service: &TriageService, id: &str) -> Session {
        for _ in 0..200 {
            let session = service.get_session(id).unwrap();
            if session.is_terminal() {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_submit_and_wait_dispatches_auto_fix() {
        let service = service();
        let session = service.submit_and_wait(misconfig_reports()).await.unwrap();

        assert_eq!(session.status, SessionStatus::Dispatched);
        assert_eq!(session.decision, Some(Decision::AutoFix));
        assert_eq!(session.action.as_ref().unwrap().kind, ActionKind::AutoFix);
    }

    #[tokio::test]
    async fn test_submit_runs_in_background() {
        let service = service();
        let id = service.submit(misconfig_reports()).unwrap();

        let session = wait_terminal(&service, &id).await;
        assert_eq!(session.status, SessionStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_docs_question_parks_then_approval_dispatches() {
        let service = service();
        let session = service.submit_and_wait(docs_reports()).await.unwrap();
        assert_eq!(session.status, SessionStatus::AwaitingApproval);
        assert_eq!(session.decision, Some(Decision::RequiresApproval));
        assert_eq!(service.pending().unwrap().len(), 1);

        let session = service
            .resolve_approval(&session.id, true, Some("send the docs link".to_string()))
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Dispatched);
        assert!(service.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_session_is_not_found() {
        let service = service();
        let err = service
            .resolve_approval("sess-missing", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_double_resolution_is_rejected() {
        let service = service();
        let session = service.submit_and_wait(docs_reports()).await.unwrap();
        service
            .resolve_approval(&session.id, false, None)
            .await
            .unwrap();

        let err = service
            .resolve_approval(&session.id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyResolved { .. }));
    }

    #[tokio::test]
    async fn test_resolving_unparked_session_is_invalid() {
        let service = service();
        let session = service.submit_and_wait(misconfig_reports()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Dispatched);

        let err = service
            .resolve_approval(&session.id, true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_queue_rebuilt_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.state_dir = Some(dir.path().join("sessions"));

        let first = service_with(config.clone());
        let session = first.submit_and_wait(docs_reports()).await.unwrap();
        assert_eq!(session.status, SessionStatus::AwaitingApproval);
        drop(first);

        let second = service_with(config);
        let pending = second.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].session_id, session.id);

        let resumed = second
            .resolve_approval(&session.id, true, None)
            .await
            .unwrap();
        assert_eq!(resumed.status, SessionStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_shutdown_drains_background_runs() {
        let service = service();
        let id = service.submit(misconfig_reports()).unwrap();

        // Must return even with a run in flight; the run either finished or
        // stopped at its next await point.
        service.shutdown().await;
        assert!(service.get_session(&id).is_ok());
    }

    #[tokio::test]
    async fn test_metrics_projection_over_sessions() {
        let service = service();
        service.submit_and_wait(misconfig_reports()).await.unwrap();
        service.submit_and_wait(docs_reports()).await.unwrap();

        let metrics = service.metrics().unwrap();
        assert_eq!(metrics.sessions_total, 2);
        assert_eq!(metrics.dispatched, 1);
        assert_eq!(metrics.awaiting_approval, 1);
        assert_eq!(metrics.auto_fixed, 1);
    }
}
