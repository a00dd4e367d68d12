//! Integration tests for the analysis controller
//!
//! Drives full sessions through the public API with a scripted language
//! model: replies are served in call order, optionally after a delay.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use investigative_analysis::analysis::{
    AnalysisConfig, AnalysisController, Article, HypothesisStatus, SessionStatus, StageKind,
    StageStatus, TERMINATED_STAGE_ERROR,
};
use investigative_analysis::error::{AnalysisError, LangbaseError, LangbaseResult};
use investigative_analysis::langbase::{LanguageModel, Message};

/// Parses as a valid reply for every stage.
const GENERIC_REPLY: &str = r#"{
    "entities": [{"id": "e1", "type": "person", "name": "Dana Holt", "confidence": 0.9}],
    "relationships": [],
    "confidence": 0.8
}"#;

struct ScriptedModel {
    replies: Mutex<VecDeque<LangbaseResult<String>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(replies: Vec<LangbaseResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn generic() -> Self {
        Self::new(Vec::new())
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _messages: Vec<Message>) -> LangbaseResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(GENERIC_REPLY.to_string()))
    }
}

fn article() -> Article {
    Article::new(
        "Paving contract awarded without tender",
        "The council awarded a $2M paving contract to Ridge Paving, owned by the mayor's brother-in-law.",
    )
    .with_source("Daily Ledger")
}

fn controller(model: Arc<ScriptedModel>) -> AnalysisController {
    AnalysisController::new(model)
}

const WAIT: Duration = Duration::from_secs(5);

mod lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_full_pipeline_runs_stages_in_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(r#"{
                "entities": [
                    {"id": "e1", "type": "person", "name": "Mayor Dana Holt", "confidence": 0.9},
                    {"id": "e2", "type": "organization", "name": "Ridge Paving", "confidence": 0.8}
                ],
                "relationships": [
                    {"id": "r1", "type": "family", "from_id": "e1", "to_id": "e2", "confidence": 0.7}
                ],
                "confidence": 0.8
            }"#
            .to_string()),
            Ok(r#"{"insights": ["Contract skipped tender"], "patterns": ["family ties"], "confidence": 0.7}"#
                .to_string()),
            Ok(r#"{
                "validation_results": {"consistency_score": 0.75},
                "issues_found": [
                    {"type": "inconsistency", "description": "Award dates differ", "severity": "high", "affected_entities": ["e1"]}
                ],
                "confidence": 0.75
            }"#
            .to_string()),
            Ok(r#"{
                "hypotheses": [
                    {"id": "h1", "description": "Contract steered to a relative", "type": "corruption",
                     "confidence": 0.6, "supporting_evidence": ["No competing bids recorded"]}
                ],
                "missing_information": [{"type": "document", "description": "Bid records", "importance": "high"}],
                "follow_up_questions": ["Who else bid?"],
                "confidence": 0.65
            }"#
            .to_string()),
            Ok(r#"{
                "key_insights": ["Procurement rules were bypassed"],
                "hypothesis_updates": [{"id": "h1", "confidence": 0.9}],
                "confidence": 0.85
            }"#
            .to_string()),
        ]));
        let controller = controller(model.clone());

        let started = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(5))
            .await
            .unwrap();
        assert_eq!(started.status, SessionStatus::Running);
        assert_eq!(started.stages.len(), 5);
        assert!(started.stages.iter().all(|s| s.status == StageStatus::Pending));

        let session = controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.completed_at.is_some());
        assert!(session.error.is_none());
        assert_eq!(session.results.len(), 5);
        assert_eq!(model.calls(), 5);

        let kinds: Vec<StageKind> = session.stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
        for (index, stage) in session.stages.iter().enumerate() {
            assert_eq!(stage.stage_number, index + 1);
            assert_eq!(stage.status, StageStatus::Completed);
            assert!(stage.started_at.is_some());
            assert!(stage.completed_at.is_some());
        }

        assert_eq!(session.stages[3].questions, vec!["Who else bid?".to_string()]);
        assert!(session.stages[4]
            .insights
            .contains(&"Procurement rules were bypassed".to_string()));

        let h1 = session.ledger.hypothesis("h1").unwrap();
        assert_eq!(h1.confidence, 0.9);
        assert_eq!(h1.status, HypothesisStatus::Supported);
        assert_eq!(h1.supporting_evidence.len(), 1);
        assert!(!session.ledger.cross_references().is_empty());
        assert!(session.ledger.evidence_count() >= 6);
    }

    #[tokio::test]
    async fn test_stage_count_follows_depth_and_max_stages() {
        let controller = controller(Arc::new(ScriptedModel::generic()));

        let two = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(2))
            .await
            .unwrap();
        assert_eq!(two.stages.len(), 2);

        let capped = controller
            .start_analysis(
                article(),
                AnalysisConfig::default().with_depth(9).with_max_stages(4),
            )
            .await
            .unwrap();
        assert_eq!(capped.stages.len(), 4);

        let registered = controller
            .start_analysis(
                article(),
                AnalysisConfig::default().with_depth(9).with_max_stages(9),
            )
            .await
            .unwrap();
        assert_eq!(registered.stages.len(), 5);

        let done = controller
            .wait_for_completion(&two.id, WAIT)
            .await
            .unwrap();
        assert_eq!(done.results.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_configs_are_rejected() {
        let model = Arc::new(ScriptedModel::generic());
        let controller = controller(model.clone());

        for config in [
            AnalysisConfig::default().with_depth(0),
            AnalysisConfig::default().with_max_stages(0),
            AnalysisConfig::default().with_confidence_threshold(1.5),
            AnalysisConfig::default().with_timeout_per_stage(Duration::ZERO),
        ] {
            let err = controller.start_analysis(article(), config).await.unwrap_err();
            assert!(matches!(err, AnalysisError::InvalidConfig { .. }));
        }

        assert!(controller.list_sessions().await.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let controller = controller(Arc::new(ScriptedModel::generic()));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let session = controller
                .start_analysis(article(), AnalysisConfig::default())
                .await
                .unwrap();
            ids.push(session.id.clone());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);

        for id in &ids {
            let session = controller.wait_for_completion(id, WAIT).await.unwrap();
            assert_eq!(session.status, SessionStatus::Completed);
            assert_eq!(session.results.len(), 3);
        }
        assert_eq!(controller.list_sessions().await.len(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_observes_progress() {
        let controller = controller(Arc::new(
            ScriptedModel::generic().with_delay(Duration::from_millis(20)),
        ));
        let started = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(2))
            .await
            .unwrap();

        let mut rx = controller.subscribe(&started.id).await.unwrap();
        let done = rx.wait_for(|s| s.is_terminal()).await.unwrap().clone();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.completed_stages().count(), 2);
    }

    #[tokio::test]
    async fn test_disabled_cross_reference_passes_results_through() {
        let model = Arc::new(ScriptedModel::generic());
        let controller = controller(model.clone());

        let started = controller
            .start_analysis(
                article(),
                AnalysisConfig::default().with_cross_reference(false),
            )
            .await
            .unwrap();
        let session = controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(model.calls(), 2);
        assert!(session.stages[2]
            .insights
            .iter()
            .any(|i| i.contains("disabled")));
        assert_eq!(session.results.len(), 3);
    }
}

mod failure_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_unparseable_reply_fails_session_at_that_stage() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(GENERIC_REPLY.to_string()),
            Ok("I could not analyze this article.".to_string()),
        ]));
        let controller = controller(model.clone());

        let started = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(5))
            .await
            .unwrap();
        let session = controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.as_deref().unwrap().contains("Stage 2"));
        assert_eq!(session.results.len(), 1);
        assert_eq!(session.stages[0].status, StageStatus::Completed);
        assert_eq!(session.stages[1].status, StageStatus::Failed);
        assert!(session.stages[1].results.is_none());
        assert!(session.stages[1].error.is_some());
        assert!(session.stages[2..]
            .iter()
            .all(|s| s.status == StageStatus::Pending));
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_model_error_at_second_stage_keeps_first_result() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(GENERIC_REPLY.to_string()),
            Err(LangbaseError::Api {
                status: 503,
                message: "overloaded".to_string(),
            }),
        ]));
        let controller = controller(model);

        let started = tokio_test::assert_ok!(
            controller
                .start_analysis(article(), AnalysisConfig::default().with_depth(2))
                .await
        );
        let session = tokio_test::assert_ok!(
            controller.wait_for_completion(&started.id, WAIT).await
        );

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.results.len(), 1);
        assert!(session.error.as_deref().unwrap().contains("Stage 2"));
        assert!(session.stages[1].error.as_deref().unwrap().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_model_error_fails_first_stage() {
        let model = Arc::new(ScriptedModel::new(vec![Err(LangbaseError::Api {
            status: 500,
            message: "upstream exploded".to_string(),
        })]));
        let controller = controller(model);

        let started = controller
            .start_analysis(article(), AnalysisConfig::default())
            .await
            .unwrap();
        let session = controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        let error = session.error.as_deref().unwrap();
        assert!(error.contains("Stage 1"));
        assert!(error.contains("upstream exploded"));
        assert!(session.results.is_empty());
        assert_eq!(session.ledger.evidence_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_stage_times_out() {
        let model = Arc::new(ScriptedModel::generic().with_delay(Duration::from_millis(500)));
        let controller = controller(model);

        let started = controller
            .start_analysis(
                article(),
                AnalysisConfig::default().with_timeout_per_stage(Duration::from_millis(50)),
            )
            .await
            .unwrap();
        let session = controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert!(session.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(session.stages[0].status, StageStatus::Failed);
        assert!(session.results.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_is_advisory() {
        let controller = controller(Arc::new(ScriptedModel::generic()));

        let started = controller
            .start_analysis(
                article(),
                AnalysisConfig::default()
                    .with_depth(1)
                    .with_confidence_threshold(0.9),
            )
            .await
            .unwrap();
        let session = controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        let stage = &session.stages[0];
        assert_eq!(stage.status, StageStatus::Completed);
        assert_eq!(
            stage.insights.last().unwrap(),
            "Low confidence: 0.80 (threshold: 0.90)"
        );
    }
}

mod termination_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_terminate_running_session() {
        let model = Arc::new(ScriptedModel::generic().with_delay(Duration::from_millis(200)));
        let controller = controller(model.clone());

        let started = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(3))
            .await
            .unwrap();
        let mut rx = controller.subscribe(&started.id).await.unwrap();
        rx.wait_for(|s| s.stages[0].status == StageStatus::Running)
            .await
            .unwrap();
        controller.terminate_session(&started.id).await.unwrap();

        let session = controller.get_session(&started.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Terminated);
        assert!(session.completed_at.is_some());

        // The in-flight stage finishes but its outcome is never published.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let session = controller.get_session(&started.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Terminated);
        assert!(session.results.is_empty());
        assert_eq!(model.calls(), 1);

        assert_eq!(session.stages[0].status, StageStatus::Failed);
        assert_eq!(session.stages[0].error.as_deref(), Some(TERMINATED_STAGE_ERROR));
        for stage in &session.stages[1..] {
            assert_eq!(stage.status, StageStatus::Pending);
            assert!(stage.started_at.is_none());
        }

        controller.terminate_session(&started.id).await.unwrap();
        let again = controller.get_session(&started.id).await.unwrap();
        assert_eq!(again.status, SessionStatus::Terminated);
    }

    #[tokio::test]
    async fn test_terminate_finished_session_is_noop() {
        let controller = controller(Arc::new(ScriptedModel::generic()));

        let started = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(1))
            .await
            .unwrap();
        controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        controller.terminate_session(&started.id).await.unwrap();
        let session = controller.get_session(&started.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let controller = controller(Arc::new(ScriptedModel::generic()));

        let err = controller.get_session("missing").await.unwrap_err();
        assert!(matches!(err, AnalysisError::SessionNotFound { .. }));

        let err = controller.terminate_session("missing").await.unwrap_err();
        assert!(matches!(err, AnalysisError::SessionNotFound { .. }));

        let err = controller
            .wait_for_completion("missing", WAIT)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_completion_times_out() {
        let controller = controller(Arc::new(
            ScriptedModel::generic().with_delay(Duration::from_millis(500)),
        ));

        let started = controller
            .start_analysis(article(), AnalysisConfig::default())
            .await
            .unwrap();
        let err = controller
            .wait_for_completion(&started.id, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::WaitTimeout { .. }));

        controller.terminate_session(&started.id).await.unwrap();
    }
}

mod cleanup_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_finished_sessions() {
        let controller = controller(Arc::new(ScriptedModel::generic()));

        let started = controller
            .start_analysis(article(), AnalysisConfig::default().with_depth(1))
            .await
            .unwrap();
        controller
            .wait_for_completion(&started.id, WAIT)
            .await
            .unwrap();

        assert_eq!(controller.cleanup_sessions(Duration::from_secs(3600)).await, 0);
        assert_eq!(controller.list_sessions().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(controller.cleanup_sessions(Duration::ZERO).await, 1);

        let err = controller.get_session(&started.id).await.unwrap_err();
        assert!(matches!(err, AnalysisError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_running_sessions() {
        let controller = controller(Arc::new(
            ScriptedModel::generic().with_delay(Duration::from_millis(300)),
        ));

        let started = controller
            .start_analysis(article(), AnalysisConfig::default())
            .await
            .unwrap();

        assert_eq!(controller.cleanup_sessions(Duration::ZERO).await, 0);
        assert_eq!(controller.list_sessions().await.len(), 1);

        controller.terminate_session(&started.id).await.unwrap();
    }
}
