//! Storage layer for finished analysis sessions.
//!
//! The controller never touches storage. A caller hands a completed
//! session to [`Storage::save_session`] and can read back the session
//! summary, its evidence and its hypotheses.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnalysisConfig, AnalysisSession, AnalysisStage, CrossReference, Evidence, ExtractionResult,
    Hypothesis, SessionStatus,
};
use crate::error::StorageResult;

/// Persisted summary of an analysis session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: String,
    /// Analyzed article.
    pub article_id: String,
    /// Status at save time.
    pub status: SessionStatus,
    /// Session config.
    pub config: AnalysisConfig,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Session end, if terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason.
    pub error: Option<String>,
    /// Mean confidence of completed stages at save time.
    pub overall_confidence: f64,
    /// Stages with their results.
    pub stages: Vec<AnalysisStage>,
    /// Accumulated stage results.
    pub results: Vec<ExtractionResult>,
    /// When the record was written.
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Summarize a session snapshot for storage.
    pub fn from_session(session: &AnalysisSession) -> Self {
        Self {
            id: session.id.clone(),
            article_id: session.article_id.clone(),
            status: session.status,
            config: session.config.clone(),
            started_at: session.started_at,
            completed_at: session.completed_at,
            error: session.error.clone(),
            overall_confidence: session.overall_confidence(),
            stages: session.stages.clone(),
            results: session.results.clone(),
            saved_at: Utc::now(),
        }
    }
}

/// Downstream sink for session results.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a session with its evidence, hypotheses and cross references,
    /// replacing anything stored earlier under the same id.
    async fn save_session(&self, session: &AnalysisSession) -> StorageResult<()>;

    /// Load the stored summary of a session.
    async fn get_session_record(&self, id: &str) -> StorageResult<Option<SessionRecord>>;

    /// Load a session's evidence, ordered by creation time.
    async fn get_session_evidence(&self, session_id: &str) -> StorageResult<Vec<Evidence>>;

    /// Load a session's hypotheses, ordered by creation time.
    async fn get_session_hypotheses(&self, session_id: &str) -> StorageResult<Vec<Hypothesis>>;

    /// Load a session's evidence cross references.
    async fn get_session_cross_references(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<CrossReference>>;

    /// Remove a session and everything stored with it.
    async fn delete_session(&self, id: &str) -> StorageResult<()>;
}
