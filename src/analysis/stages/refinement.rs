use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{article_block, invoke_model, parse_reply, StageContext, StageProcessor};
use crate::analysis::confidence;
use crate::analysis::ledger::{Evidence, EvidenceKind, Hypothesis, HypothesisRevision};
use crate::analysis::serialize_for_prompt;
use crate::analysis::types::{
    lenient_vec, AnalysisStage, ExtractedEntity, ExtractedRelationship, ExtractionResult,
};
use crate::analysis::StageKind;
use crate::error::StageResult;
use crate::langbase::LanguageModel;
use crate::prompts::RECURSIVE_REFINEMENT_PROMPT;

#[derive(Debug, Default, Deserialize)]
struct ConfidenceAssessment {
    overall_confidence: Option<f64>,
    #[serde(default)]
    data_quality: String,
    #[serde(default)]
    evidence_strength: String,
}

#[derive(Debug, Deserialize)]
struct HypothesisUpdate {
    #[serde(default)]
    id: String,
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_vec")]
    supporting_evidence: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    contradicting_evidence: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RefinementReply {
    #[serde(default, deserialize_with = "lenient_vec")]
    final_entities: Vec<ExtractedEntity>,
    #[serde(default, deserialize_with = "lenient_vec")]
    final_relationships: Vec<ExtractedRelationship>,
    #[serde(default, deserialize_with = "lenient_vec")]
    key_insights: Vec<String>,
    #[serde(default, alias = "corruption_indicators")]
    indicators: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    confidence_assessment: Option<ConfidenceAssessment>,
    #[serde(default, deserialize_with = "lenient_vec")]
    hypothesis_updates: Vec<HypothesisUpdate>,
    #[serde(default, deserialize_with = "lenient_vec")]
    next_steps: Vec<String>,
    confidence: Option<f64>,
}

#[derive(Serialize)]
struct SynthesisInput<'a> {
    previous_results: &'a [ExtractionResult],
    hypotheses: Vec<&'a Hypothesis>,
    evidence: Vec<&'a Evidence>,
}

/// Stage 5: final synthesis and hypothesis re-assessment.
pub struct RecursiveRefinement {
    model: Arc<dyn LanguageModel>,
}

impl RecursiveRefinement {
    /// Create the processor over a shared model
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageProcessor for RecursiveRefinement {
    fn kind(&self) -> StageKind {
        StageKind::RecursiveRefinement
    }

    fn description(&self) -> &'static str {
        "Perform additional refinement and synthesis of all previous analysis"
    }

    async fn process(&self, ctx: StageContext<'_>, stage: &mut AnalysisStage) -> StageResult<()> {
        let last = ctx.last_result(self.kind())?.clone();
        let user = {
            let input = SynthesisInput {
                previous_results: ctx.previous_results,
                hypotheses: ctx.ledger.hypotheses().collect(),
                evidence: ctx.ledger.all_evidence().collect(),
            };
            format!(
                "Perform final synthesis and refinement of the complete analysis.\n\n\
                 Complete analysis data:\n{}\n\n{}",
                serialize_for_prompt(&input, "refinement.input"),
                article_block(ctx.article)
            )
        };
        let completion =
            invoke_model(self.model.as_ref(), self.kind(), RECURSIVE_REFINEMENT_PROMPT, user)
                .await?;
        let reply: RefinementReply = parse_reply(self.kind(), &completion)?;

        let entities = if reply.final_entities.is_empty() {
            last.entities
        } else {
            reply.final_entities
        };
        let relationships = if reply.final_relationships.is_empty() {
            last.relationships
        } else {
            reply.final_relationships
        };
        let mut result = ExtractionResult::new(entities, relationships, 0.0);
        result.stamp(&ctx.article.id, Utc::now());
        let assessed = reply
            .confidence_assessment
            .as_ref()
            .and_then(|a| a.overall_confidence);
        result.confidence = confidence::resolve(reply.confidence.or(assessed), || {
            confidence::extraction(&result)
        });

        let stage_number = stage.stage_number;
        let source = self.name();
        let mut revised = 0usize;
        for update in reply.hypothesis_updates {
            // Free-text references become evidence, so resolve only once the
            // target is known to exist.
            if ctx.ledger.hypothesis(&update.id).is_none() {
                debug!(
                    session_id = %ctx.session_id,
                    hypothesis_id = %update.id,
                    "Ignoring update for unknown hypothesis"
                );
                continue;
            }
            let weight = update.confidence.unwrap_or(result.confidence);
            let mut resolve = |references: Vec<String>| -> Vec<String> {
                references
                    .iter()
                    .filter_map(|r| {
                        ctx.ledger.resolve_reference(
                            r,
                            EvidenceKind::Inference,
                            stage_number,
                            source,
                            weight,
                        )
                    })
                    .collect()
            };
            let revision = HypothesisRevision {
                confidence: update.confidence,
                supporting_evidence: resolve(update.supporting_evidence),
                contradicting_evidence: resolve(update.contradicting_evidence),
            };
            if ctx.ledger.revise_hypothesis(&update.id, revision) {
                revised += 1;
            }
        }

        stage.insights.extend(reply.key_insights);
        for (category, items) in &reply.indicators {
            if !items.is_empty() {
                stage.insights.push(format!(
                    "Indicators of {}: {}",
                    category.replace('_', " "),
                    items.len()
                ));
            }
        }
        if let Some(assessment) = &reply.confidence_assessment {
            if !assessment.data_quality.is_empty() || !assessment.evidence_strength.is_empty() {
                stage.insights.push(format!(
                    "Data quality: {}, evidence strength: {}",
                    assessment.data_quality, assessment.evidence_strength
                ));
            }
        }
        if revised > 0 {
            stage.insights.push(format!("Revised {} hypotheses", revised));
        }
        stage.insights.extend(reply.next_steps);
        stage.confidence = result.confidence;
        stage.results = Some(result);
        Ok(())
    }
}
