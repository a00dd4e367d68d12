use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::confidence::low_confidence_insight;
use super::ledger::Ledger;
use super::session::{SessionHandle, SessionWriter};
use super::stages::{standard_pipeline, StageContext, StageProcessor};
use super::types::{
    AnalysisConfig, AnalysisSession, AnalysisStage, Article, SessionStatus, StageStatus,
};
use crate::error::{AnalysisError, AnalysisResult, StageError, StageResult};
use crate::langbase::LanguageModel;

type Pipeline = Arc<[Arc<dyn StageProcessor>]>;

/// Creates sessions, runs each on its own task and serves their snapshots.
///
/// The session map is the only shared structure. Session state itself is
/// written by exactly one task per session through a [`SessionHandle`]
/// channel, so lookups never observe a half-written stage.
pub struct AnalysisController {
    pipeline: Pipeline,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl AnalysisController {
    /// Controller running the standard five-stage pipeline on `model`.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self::with_pipeline(standard_pipeline(model))
    }

    /// Controller running a custom ordered set of processors.
    pub fn with_pipeline(pipeline: Vec<Arc<dyn StageProcessor>>) -> Self {
        Self {
            pipeline: pipeline.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of registered processors.
    pub fn registered_stages(&self) -> usize {
        self.pipeline.len()
    }

    /// Register a new session and start processing it in the background.
    ///
    /// Returns the initial snapshot with every stage pending. Must be called
    /// from within a Tokio runtime.
    pub async fn start_analysis(
        &self,
        article: Article,
        config: AnalysisConfig,
    ) -> AnalysisResult<Arc<AnalysisSession>> {
        let stage_count = config.validate(self.pipeline.len())?;

        let stages = self.pipeline[..stage_count]
            .iter()
            .enumerate()
            .map(|(index, processor)| {
                AnalysisStage::new(
                    index + 1,
                    processor.kind(),
                    processor.name(),
                    processor.description(),
                )
            })
            .collect();
        let session = AnalysisSession::new(article.id.clone(), config, stages);
        let session_id = session.id.clone();

        let (handle, writer) = SessionHandle::new(session.clone());
        let initial = handle.snapshot();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), handle);

        info!(
            session_id = %session_id,
            article_id = %article.id,
            stages = stage_count,
            "Analysis session started"
        );

        tokio::spawn(process_session(
            self.pipeline.clone(),
            writer,
            session,
            article,
        ));

        Ok(initial)
    }

    /// Latest snapshot of a session.
    pub async fn get_session(&self, session_id: &str) -> AnalysisResult<Arc<AnalysisSession>> {
        self.handle(session_id).await.map(|h| h.snapshot())
    }

    /// Ask a running session to stop at the next stage boundary.
    ///
    /// Sessions already in a terminal state are left untouched. A stage that
    /// is executing keeps running, but its outcome is never published: the
    /// terminated snapshot shows it as failed with [`TERMINATED_STAGE_ERROR`]
    /// and every later stage stays pending.
    ///
    /// [`TERMINATED_STAGE_ERROR`]: super::TERMINATED_STAGE_ERROR
    pub async fn terminate_session(&self, session_id: &str) -> AnalysisResult<()> {
        let handle = self.handle(session_id).await?;
        if handle.terminate() {
            info!(session_id = %session_id, "Analysis session terminated");
        } else {
            debug!(session_id = %session_id, "Terminate ignored, session already finished");
        }
        Ok(())
    }

    /// Snapshots of every registered session.
    pub async fn list_sessions(&self) -> Vec<Arc<AnalysisSession>> {
        self.sessions
            .read()
            .await
            .values()
            .map(SessionHandle::snapshot)
            .collect()
    }

    /// Drop finished sessions that completed more than `max_age` ago.
    /// Running sessions are never removed. Returns how many were dropped.
    pub async fn cleanup_sessions(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            warn!(max_age_secs = max_age.as_secs(), "Cleanup age out of range, nothing removed");
            return 0;
        };

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| {
            let snapshot = handle.snapshot();
            let expired = snapshot.is_terminal()
                && snapshot.completed_at.is_some_and(|done| done < cutoff);
            !expired
        });
        let removed = before - sessions.len();

        if removed > 0 {
            info!(removed, remaining = sessions.len(), "Cleaned up analysis sessions");
        }
        removed
    }

    /// Watch a session's snapshots as they are published.
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> AnalysisResult<watch::Receiver<Arc<AnalysisSession>>> {
        self.handle(session_id).await.map(|h| h.subscribe())
    }

    /// Wait until a session reaches a terminal state.
    pub async fn wait_for_completion(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> AnalysisResult<Arc<AnalysisSession>> {
        let mut rx = self.subscribe(session_id).await?;
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal())).await;
        match waited {
            Ok(Ok(snapshot)) => Ok(Arc::clone(&snapshot)),
            Ok(Err(_)) => Err(AnalysisError::SessionNotFound {
                session_id: session_id.to_string(),
            }),
            Err(_) => Err(AnalysisError::WaitTimeout {
                session_id: session_id.to_string(),
            }),
        }
    }

    async fn handle(&self, session_id: &str) -> AnalysisResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AnalysisError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }
}

/// Walk the session's stages in order, publishing after every transition.
async fn process_session(
    pipeline: Pipeline,
    writer: SessionWriter,
    mut session: AnalysisSession,
    article: Article,
) {
    let session_id = session.id.clone();
    let start = Instant::now();

    for index in 0..session.stages.len() {
        let stage_number = index + 1;
        let processor = pipeline[index].as_ref();

        {
            let stage = &mut session.stages[index];
            stage.status = StageStatus::Running;
            stage.started_at = Some(Utc::now());
        }
        // Refused only when the session was terminated; this is the
        // stage-boundary check.
        if !writer.publish(&session) {
            info!(
                session_id = %session_id,
                stage = stage_number,
                "Session terminated, remaining stages skipped"
            );
            return;
        }
        debug!(session_id = %session_id, stage = stage_number, name = processor.name(), "Stage started");

        let outcome = run_stage(processor, &session, index, &article).await;
        if writer.is_terminal() {
            info!(
                session_id = %session_id,
                stage = stage_number,
                "Session terminated during stage, outcome discarded"
            );
            return;
        }

        match outcome {
            Ok((finished, ledger)) => {
                session.ledger = ledger;
                let threshold = session.config.confidence_threshold;
                let stage = &mut session.stages[index];
                *stage = finished;
                stage.status = StageStatus::Completed;
                stage.completed_at = Some(Utc::now());
                stage.error = None;
                if stage.confidence < threshold {
                    warn!(
                        session_id = %session_id,
                        stage = stage_number,
                        confidence = stage.confidence,
                        threshold,
                        "Stage confidence below threshold"
                    );
                    stage
                        .insights
                        .push(low_confidence_insight(stage.confidence, threshold));
                }
                if let Some(result) = &stage.results {
                    session.results.push(result.clone());
                }
                info!(
                    session_id = %session_id,
                    stage = stage_number,
                    confidence = session.stages[index].confidence,
                    "Stage completed"
                );
            }
            Err(source) => {
                let stage_error = source.to_string();
                let failure = AnalysisError::StageFailed {
                    stage: stage_number,
                    source,
                };
                error!(session_id = %session_id, error = %failure, "Stage failed");

                let now = Utc::now();
                let stage = &mut session.stages[index];
                stage.status = StageStatus::Failed;
                stage.completed_at = Some(now);
                stage.results = None;
                stage.error = Some(stage_error);
                session.status = SessionStatus::Failed;
                session.error = Some(failure.to_string());
                session.completed_at = Some(now);
                writer.publish(&session);
                return;
            }
        }
    }

    session.status = SessionStatus::Completed;
    session.completed_at = Some(Utc::now());
    // A terminate that raced the last stage wins.
    if !writer.publish(&session) {
        info!(session_id = %session_id, "Session terminated before completion was published");
        return;
    }
    info!(
        session_id = %session_id,
        results = session.results.len(),
        evidence = session.ledger.evidence_count(),
        hypotheses = session.ledger.hypothesis_count(),
        overall_confidence = session.overall_confidence(),
        latency_ms = start.elapsed().as_millis() as u64,
        "Analysis session completed"
    );
}

/// Run one processor against scratch copies of its stage and the ledger,
/// bounded by the per-stage timeout. Nothing is committed on failure.
async fn run_stage(
    processor: &dyn StageProcessor,
    session: &AnalysisSession,
    index: usize,
    article: &Article,
) -> StageResult<(AnalysisStage, Ledger)> {
    let mut stage = session.stages[index].clone();
    let mut ledger = session.ledger.clone();
    let timeout = session.config.timeout_per_stage;

    let ctx = StageContext {
        session_id: &session.id,
        article,
        config: &session.config,
        prior_stages: &session.stages[..index],
        previous_results: &session.results,
        ledger: &mut ledger,
    };
    match tokio::time::timeout(timeout, processor.process(ctx, &mut stage)).await {
        Ok(Ok(())) => Ok((stage, ledger)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(StageError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
