//! Integration tests for SQLite storage layer
//!
//! Each test opens a fresh database file in a temporary directory.

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use investigative_analysis::analysis::{
    AnalysisConfig, AnalysisSession, AnalysisStage, CrossReferenceKind, Evidence, EvidenceKind,
    ExtractionResult, Hypothesis, HypothesisStatus, Ledger, SessionStatus, StageKind,
    StageStatus,
};
use investigative_analysis::config::DatabaseConfig;
use investigative_analysis::storage::{SessionRecord, SqliteStorage, Storage};

async fn create_test_storage(dir: &TempDir) -> SqliteStorage {
    let config = DatabaseConfig {
        path: dir.path().join("nested").join("analysis.db"),
        max_connections: 2,
    };
    SqliteStorage::new(&config)
        .await
        .expect("Failed to create storage")
}

fn completed_session() -> AnalysisSession {
    let mut stage = AnalysisStage::new(
        1,
        StageKind::SurfaceExtraction,
        StageKind::SurfaceExtraction.display_name(),
        "Extract entities",
    );
    stage.status = StageStatus::Completed;
    stage.confidence = 0.8;
    stage.insights = vec!["Extracted 0 entities and 0 relationships".to_string()];
    stage.results = Some(ExtractionResult::new(Vec::new(), Vec::new(), 0.8));

    let mut session = AnalysisSession::new(
        "article-42",
        AnalysisConfig::default().with_depth(1),
        vec![stage],
    );
    session.results = vec![ExtractionResult::new(Vec::new(), Vec::new(), 0.8)];
    session.status = SessionStatus::Completed;
    session.completed_at = Some(Utc::now());

    let mut ledger = Ledger::default();
    let entity = ledger.add_evidence(
        Evidence::new(EvidenceKind::Entity, 1, "Ridge Paving")
            .with_entity("e2")
            .with_confidence(0.8)
            .with_metadata(json!({"entity_type": "organization"})),
    );
    let issue = ledger.add_evidence(
        Evidence::new(EvidenceKind::Validation, 3, "Ownership records disagree")
            .with_entity("e2")
            .with_context("Check the company registry"),
    );
    ledger.link(CrossReferenceKind::Contradicts, &issue, &entity, "ownership", 0.9);

    let mut hypothesis = Hypothesis::new(4, "Contract steered to a relative")
        .with_id("h1")
        .with_type("corruption")
        .with_confidence(0.75)
        .with_implications(vec!["Procurement audit".to_string()]);
    hypothesis.supporting_evidence.insert(entity.clone());
    ledger.record_hypothesis(hypothesis);

    session.ledger = ledger;
    session
}

mod session_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_save_and_get_session_record() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;
        let session = completed_session();

        storage.save_session(&session).await.unwrap();

        let record: SessionRecord = storage
            .get_session_record(&session.id)
            .await
            .unwrap()
            .expect("record should exist");
        assert_eq!(record.id, session.id);
        assert_eq!(record.article_id, "article-42");
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.config.depth, 1);
        assert_eq!(record.stages.len(), 1);
        assert_eq!(record.stages[0].kind, StageKind::SurfaceExtraction);
        assert_eq!(record.stages[0].status, StageStatus::Completed);
        assert_eq!(record.results.len(), 1);
        assert_eq!(record.overall_confidence, 0.8);
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_get_nonexistent_session() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;

        let result = storage.get_session_record("nonexistent-id").await.unwrap();
        assert!(result.is_none(), "Should return None for nonexistent session");
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;
        let session = completed_session();

        storage.save_session(&session).await.unwrap();
        storage.save_session(&session).await.unwrap();

        assert_eq!(storage.get_session_evidence(&session.id).await.unwrap().len(), 2);
        assert_eq!(storage.get_session_hypotheses(&session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;
        let first = completed_session();
        let second = completed_session();

        storage.save_session(&first).await.unwrap();
        storage.save_session(&second).await.unwrap();
        storage.delete_session(&first.id).await.unwrap();

        assert!(storage.get_session_record(&first.id).await.unwrap().is_none());
        assert!(storage.get_session_record(&second.id).await.unwrap().is_some());
        assert_eq!(storage.get_session_evidence(&second.id).await.unwrap().len(), 2);
    }
}

mod ledger_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_evidence_round_trip_keeps_fields() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;
        let session = completed_session();
        storage.save_session(&session).await.unwrap();

        let evidence = storage.get_session_evidence(&session.id).await.unwrap();
        let entity = evidence
            .iter()
            .find(|e| e.kind == EvidenceKind::Entity)
            .expect("entity evidence");
        assert_eq!(entity.text, "Ridge Paving");
        assert_eq!(entity.entity_id.as_deref(), Some("e2"));
        assert_eq!(entity.stage, 1);
        assert_eq!(entity.confidence, 0.8);
        assert_eq!(entity.metadata, Some(json!({"entity_type": "organization"})));

        let issue = evidence
            .iter()
            .find(|e| e.kind == EvidenceKind::Validation)
            .expect("validation evidence");
        assert_eq!(issue.context, "Check the company registry");
        assert!(issue.metadata.is_none());
    }

    #[tokio::test]
    async fn test_hypotheses_round_trip_keeps_evidence_links() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;
        let session = completed_session();
        storage.save_session(&session).await.unwrap();

        let hypotheses = storage.get_session_hypotheses(&session.id).await.unwrap();
        assert_eq!(hypotheses.len(), 1);
        let h1 = &hypotheses[0];
        assert_eq!(h1.id, "h1");
        assert_eq!(h1.hypothesis_type, "corruption");
        assert_eq!(h1.status, HypothesisStatus::Proposed);
        assert_eq!(h1.implications, vec!["Procurement audit".to_string()]);
        assert_eq!(
            h1.supporting_evidence,
            session.ledger.hypothesis("h1").unwrap().supporting_evidence
        );
    }

    #[tokio::test]
    async fn test_cross_references_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = create_test_storage(&dir).await;
        let session = completed_session();
        storage.save_session(&session).await.unwrap();

        let links = storage
            .get_session_cross_references(&session.id)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.kind, CrossReferenceKind::Contradicts);
        assert_eq!(link.description, "ownership");
        assert_eq!(link.strength, 0.9);
        assert_eq!(link.id, session.ledger.cross_references()[0].id);
    }
}
