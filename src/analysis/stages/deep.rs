use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::{article_block, invoke_model, parse_reply, StageContext, StageProcessor};
use crate::analysis::confidence;
use crate::analysis::ledger::{Evidence, EvidenceKind};
use crate::analysis::serialize_for_prompt;
use crate::analysis::types::{
    lenient_vec, AnalysisStage, ExtractedEntity, ExtractedRelationship, ExtractionResult,
};
use crate::analysis::StageKind;
use crate::error::StageResult;
use crate::langbase::LanguageModel;
use crate::prompts::DEEP_ANALYSIS_PROMPT;

#[derive(Debug, Deserialize)]
struct DeepReply {
    #[serde(default, deserialize_with = "lenient_vec")]
    entities: Vec<ExtractedEntity>,
    #[serde(default, deserialize_with = "lenient_vec")]
    relationships: Vec<ExtractedRelationship>,
    #[serde(default, deserialize_with = "lenient_vec")]
    insights: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    patterns: Vec<String>,
    confidence: Option<f64>,
}

/// Stage 2: roles, relationship strength, motivations and patterns.
pub struct DeepAnalysis {
    model: Arc<dyn LanguageModel>,
}

impl DeepAnalysis {
    /// Create the processor over a shared model
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageProcessor for DeepAnalysis {
    fn kind(&self) -> StageKind {
        StageKind::DeepAnalysis
    }

    fn description(&self) -> &'static str {
        "Analyze entity roles, relationship strengths, motivations, and patterns"
    }

    async fn process(&self, ctx: StageContext<'_>, stage: &mut AnalysisStage) -> StageResult<()> {
        let last = ctx.last_result(self.kind())?;
        let user = format!(
            "Perform deep analysis of the extracted entities and relationships.\n\n\
             Previous extraction results:\n{}\n\n{}",
            serialize_for_prompt(last, "deep_analysis.previous"),
            article_block(ctx.article)
        );
        let completion =
            invoke_model(self.model.as_ref(), self.kind(), DEEP_ANALYSIS_PROMPT, user).await?;
        let reply: DeepReply = parse_reply(self.kind(), &completion)?;

        let mut result = ExtractionResult::new(reply.entities, reply.relationships, 0.0);
        result.stamp(&ctx.article.id, Utc::now());
        result.confidence = confidence::resolve(reply.confidence, || confidence::extraction(&result));

        for pattern in &reply.patterns {
            ctx.ledger.add_evidence(
                Evidence::new(EvidenceKind::Pattern, stage.stage_number, pattern)
                    .with_source(self.name())
                    .with_confidence(result.confidence),
            );
        }

        stage.insights.extend(reply.insights);
        stage.insights.extend(reply.patterns);
        if stage.insights.is_empty() {
            stage.insights.push(format!(
                "Deep analysis refined {} entities and {} relationships",
                result.entities.len(),
                result.relationships.len()
            ));
        }
        stage.confidence = result.confidence;
        stage.results = Some(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::analysis::ledger::Ledger;
    use crate::analysis::types::AnalysisConfig;
    use crate::error::StageError;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_deep_analysis_requires_previous_result() {
        let processor = DeepAnalysis::new(unused_model());
        let article = article();
        let config = AnalysisConfig::default();
        let mut ledger = Ledger::default();
        let mut record = stage(2, StageKind::DeepAnalysis);

        let err = processor
            .process(context(&article, &config, &[], &mut ledger), &mut record)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingInput { .. }));
        assert!(record.results.is_none());
    }

    #[tokio::test]
    async fn test_deep_analysis_turns_patterns_into_evidence() {
        let processor = DeepAnalysis::new(model_replying(
            r#"{
                "entities": [{"id": "e1", "type": "person", "name": "Mayor Dana Holt",
                              "confidence": 0.9, "mentions": "same_as_before"}],
                "relationships": [],
                "insights": ["Mayor holds approval power over the contract"],
                "patterns": ["Conflict of interest in procurement"],
                "confidence": 0.75
            }"#,
        ));
        let article = article();
        let config = AnalysisConfig::default();
        let previous = vec![sample_result(0.8)];
        let mut ledger = Ledger::default();
        let mut record = stage(2, StageKind::DeepAnalysis);

        processor
            .process(context(&article, &config, &previous, &mut ledger), &mut record)
            .await
            .unwrap();

        assert_eq!(
            record.insights,
            vec![
                "Mayor holds approval power over the contract".to_string(),
                "Conflict of interest in procurement".to_string(),
            ]
        );
        assert_eq!(record.confidence, 0.75);
        let patterns = ledger.evidence_for_stage(2);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, EvidenceKind::Pattern);
        assert_eq!(record.results.as_ref().unwrap().entities[0].article_id, article.id);
    }
}
