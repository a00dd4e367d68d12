use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use super::{SessionRecord, Storage};
use crate::analysis::{
    AnalysisSession, CrossReference, CrossReferenceKind, Evidence, EvidenceKind, Hypothesis,
    HypothesisStatus, SessionStatus,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database and bring its schema up to date.
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn delete_rows(tx: &mut Transaction<'_, Sqlite>, session_id: &str) -> StorageResult<()> {
        for table in ["cross_references", "hypotheses", "evidence"] {
            sqlx::query(&format!("DELETE FROM {} WHERE session_id = ?", table))
                .bind(session_id)
                .execute(&mut **tx)
                .await?;
        }
        sqlx::query("DELETE FROM analysis_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_session(&self, session: &AnalysisSession) -> StorageResult<()> {
        let record = SessionRecord::from_session(session);
        let mut tx = self.pool.begin().await?;

        Self::delete_rows(&mut tx, &record.id).await?;

        sqlx::query(
            r#"
            INSERT INTO analysis_sessions
                (id, article_id, status, config, started_at, completed_at, error,
                 overall_confidence, stages, results, saved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.article_id)
        .bind(record.status.as_str())
        .bind(to_json(&record.config)?)
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(&record.error)
        .bind(record.overall_confidence)
        .bind(to_json(&record.stages)?)
        .bind(to_json(&record.results)?)
        .bind(record.saved_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for evidence in session.ledger.all_evidence() {
            let metadata = evidence.metadata.as_ref().map(to_json).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO evidence
                    (id, session_id, kind, stage, entity_id, text, context, source,
                     confidence, created_at, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&evidence.id)
            .bind(&record.id)
            .bind(evidence.kind.as_str())
            .bind(evidence.stage as i64)
            .bind(&evidence.entity_id)
            .bind(&evidence.text)
            .bind(&evidence.context)
            .bind(&evidence.source)
            .bind(evidence.confidence)
            .bind(evidence.created_at.to_rfc3339())
            .bind(metadata)
            .execute(&mut *tx)
            .await?;
        }

        for hypothesis in session.ledger.hypotheses() {
            sqlx::query(
                r#"
                INSERT INTO hypotheses
                    (id, session_id, stage, description, hypothesis_type, confidence, status,
                     supporting_evidence, contradicting_evidence, required_evidence,
                     implications, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&hypothesis.id)
            .bind(&record.id)
            .bind(hypothesis.stage as i64)
            .bind(&hypothesis.description)
            .bind(&hypothesis.hypothesis_type)
            .bind(hypothesis.confidence)
            .bind(hypothesis.status.as_str())
            .bind(to_json(&hypothesis.supporting_evidence)?)
            .bind(to_json(&hypothesis.contradicting_evidence)?)
            .bind(to_json(&hypothesis.required_evidence)?)
            .bind(to_json(&hypothesis.implications)?)
            .bind(hypothesis.created_at.to_rfc3339())
            .bind(hypothesis.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for link in session.ledger.cross_references() {
            sqlx::query(
                r#"
                INSERT INTO cross_references
                    (id, session_id, kind, from_id, to_id, description, strength, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&link.id)
            .bind(&record.id)
            .bind(link.kind.as_str())
            .bind(&link.from_id)
            .bind(&link.to_id)
            .bind(&link.description)
            .bind(link.strength)
            .bind(link.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            session_id = %record.id,
            status = %record.status,
            evidence = session.ledger.evidence_count(),
            hypotheses = session.ledger.hypothesis_count(),
            "Session saved"
        );
        Ok(())
    }

    async fn get_session_record(&self, id: &str) -> StorageResult<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, article_id, status, config, started_at, completed_at, error,
                   overall_confidence, stages, results, saved_at
            FROM analysis_sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRecord::try_from).transpose()
    }

    async fn get_session_evidence(&self, session_id: &str) -> StorageResult<Vec<Evidence>> {
        let rows: Vec<EvidenceRow> = sqlx::query_as(
            r#"
            SELECT id, kind, stage, entity_id, text, context, source, confidence,
                   created_at, metadata
            FROM evidence
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Evidence::try_from).collect()
    }

    async fn get_session_hypotheses(&self, session_id: &str) -> StorageResult<Vec<Hypothesis>> {
        let rows: Vec<HypothesisRow> = sqlx::query_as(
            r#"
            SELECT id, stage, description, hypothesis_type, confidence, status,
                   supporting_evidence, contradicting_evidence, required_evidence,
                   implications, created_at, updated_at
            FROM hypotheses
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Hypothesis::try_from).collect()
    }

    async fn get_session_cross_references(
        &self,
        session_id: &str,
    ) -> StorageResult<Vec<CrossReference>> {
        let rows: Vec<CrossReferenceRow> = sqlx::query_as(
            r#"
            SELECT id, kind, from_id, to_id, description, strength, created_at
            FROM cross_references
            WHERE session_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CrossReference::try_from).collect()
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::delete_rows(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn to_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Query {
        message: format!("Failed to serialize column: {}", e),
    })
}

fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> StorageResult<T> {
    serde_json::from_str(raw).map_err(|e| StorageError::Query {
        message: format!("Malformed {} column: {}", column, e),
    })
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> StorageResult<T> {
    raw.parse()
        .map_err(|message: String| StorageError::Query { message })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    article_id: String,
    status: String,
    config: String,
    started_at: String,
    completed_at: Option<String>,
    error: Option<String>,
    overall_confidence: f64,
    stages: String,
    results: String,
    saved_at: String,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> StorageResult<Self> {
        Ok(Self {
            status: parse_enum::<SessionStatus>(&row.status)?,
            config: from_json("config", &row.config)?,
            started_at: parse_timestamp(&row.started_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            stages: from_json("stages", &row.stages)?,
            results: from_json("results", &row.results)?,
            saved_at: parse_timestamp(&row.saved_at),
            id: row.id,
            article_id: row.article_id,
            error: row.error,
            overall_confidence: row.overall_confidence,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EvidenceRow {
    id: String,
    kind: String,
    stage: i64,
    entity_id: Option<String>,
    text: String,
    context: String,
    source: String,
    confidence: f64,
    created_at: String,
    metadata: Option<String>,
}

impl TryFrom<EvidenceRow> for Evidence {
    type Error = StorageError;

    fn try_from(row: EvidenceRow) -> StorageResult<Self> {
        Ok(Self {
            kind: parse_enum::<EvidenceKind>(&row.kind)?,
            stage: row.stage.max(0) as usize,
            created_at: parse_timestamp(&row.created_at),
            metadata: row.metadata.and_then(|s| serde_json::from_str(&s).ok()),
            id: row.id,
            entity_id: row.entity_id,
            text: row.text,
            context: row.context,
            source: row.source,
            confidence: row.confidence,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HypothesisRow {
    id: String,
    stage: i64,
    description: String,
    hypothesis_type: String,
    confidence: f64,
    status: String,
    supporting_evidence: String,
    contradicting_evidence: String,
    required_evidence: String,
    implications: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<HypothesisRow> for Hypothesis {
    type Error = StorageError;

    fn try_from(row: HypothesisRow) -> StorageResult<Self> {
        Ok(Self {
            stage: row.stage.max(0) as usize,
            status: parse_enum::<HypothesisStatus>(&row.status)?,
            supporting_evidence: from_json("supporting_evidence", &row.supporting_evidence)?,
            contradicting_evidence: from_json(
                "contradicting_evidence",
                &row.contradicting_evidence,
            )?,
            required_evidence: from_json("required_evidence", &row.required_evidence)?,
            implications: from_json("implications", &row.implications)?,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            id: row.id,
            description: row.description,
            hypothesis_type: row.hypothesis_type,
            confidence: row.confidence,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CrossReferenceRow {
    id: String,
    kind: String,
    from_id: String,
    to_id: String,
    description: String,
    strength: f64,
    created_at: String,
}

impl TryFrom<CrossReferenceRow> for CrossReference {
    type Error = StorageError;

    fn try_from(row: CrossReferenceRow) -> StorageResult<Self> {
        Ok(Self {
            kind: parse_enum::<CrossReferenceKind>(&row.kind)?,
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            from_id: row.from_id,
            to_id: row.to_id,
            description: row.description,
            strength: row.strength,
        })
    }
}
