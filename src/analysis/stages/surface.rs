use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::{article_block, invoke_model, parse_reply, StageContext, StageProcessor};
use crate::analysis::confidence;
use crate::analysis::ledger::{Evidence, EvidenceKind};
use crate::analysis::types::{
    lenient_vec, AnalysisStage, ExtractedEntity, ExtractedRelationship, ExtractionResult,
};
use crate::analysis::StageKind;
use crate::error::StageResult;
use crate::langbase::LanguageModel;
use crate::prompts::SURFACE_EXTRACTION_PROMPT;

#[derive(Debug, Deserialize)]
struct SurfaceReply {
    #[serde(default, deserialize_with = "lenient_vec")]
    entities: Vec<ExtractedEntity>,
    #[serde(default, deserialize_with = "lenient_vec")]
    relationships: Vec<ExtractedRelationship>,
    confidence: Option<f64>,
}

/// Stage 1: pull entities and relationships straight out of the text.
pub struct SurfaceExtraction {
    model: Arc<dyn LanguageModel>,
}

impl SurfaceExtraction {
    /// Create the processor over a shared model
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageProcessor for SurfaceExtraction {
    fn kind(&self) -> StageKind {
        StageKind::SurfaceExtraction
    }

    fn description(&self) -> &'static str {
        "Extract basic entities, relationships, and temporal information from the article"
    }

    async fn process(&self, ctx: StageContext<'_>, stage: &mut AnalysisStage) -> StageResult<()> {
        let user = format!(
            "Perform initial entity extraction from this article.\n\n{}",
            article_block(ctx.article)
        );
        let completion =
            invoke_model(self.model.as_ref(), self.kind(), SURFACE_EXTRACTION_PROMPT, user).await?;
        let reply: SurfaceReply = parse_reply(self.kind(), &completion)?;

        let mut result = ExtractionResult::new(reply.entities, reply.relationships, 0.0);
        result.stamp(&ctx.article.id, Utc::now());
        result.confidence = confidence::resolve(reply.confidence, || confidence::extraction(&result));

        for entity in &result.entities {
            let mut evidence = Evidence::new(EvidenceKind::Entity, stage.stage_number, &entity.name)
                .with_entity(&entity.id)
                .with_source(self.name())
                .with_confidence(entity.confidence)
                .with_metadata(serde_json::json!({ "entity_type": entity.entity_type }));
            if let Some(mention) = entity.mentions.first() {
                evidence = evidence.with_context(&mention.context);
            }
            ctx.ledger.add_evidence(evidence);
        }

        for relationship in &result.relationships {
            let name_of = |id: &str| {
                result
                    .entity(id)
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| id.to_string())
            };
            let text = format!(
                "{} -[{}]-> {}",
                name_of(&relationship.from_id),
                relationship.relationship_type,
                name_of(&relationship.to_id)
            );
            ctx.ledger.add_evidence(
                Evidence::new(EvidenceKind::Relationship, stage.stage_number, text)
                    .with_entity(&relationship.from_id)
                    .with_context(&relationship.context)
                    .with_source(self.name())
                    .with_confidence(relationship.confidence)
                    .with_metadata(serde_json::json!({ "relationship_id": relationship.id })),
            );
        }

        stage.insights.push(format!(
            "Extracted {} entities and {} relationships",
            result.entities.len(),
            result.relationships.len()
        ));
        stage
            .insights
            .push("Initial extraction complete with basic entity recognition".to_string());
        stage.confidence = result.confidence;
        stage.results = Some(result);
        Ok(())
    }
}
