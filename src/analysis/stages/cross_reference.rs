use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::{article_block, invoke_model, parse_reply, pass_through, StageContext, StageProcessor};
use crate::analysis::confidence;
use crate::analysis::ledger::{CrossReferenceKind, Evidence, EvidenceKind};
use crate::analysis::serialize_for_prompt;
use crate::analysis::types::{
    lenient_vec, AnalysisStage, ExtractedEntity, ExtractedRelationship, ExtractionResult,
};
use crate::analysis::StageKind;
use crate::error::StageResult;
use crate::langbase::LanguageModel;
use crate::prompts::CROSS_REFERENCE_PROMPT;

/// Confidence recorded when there is too little to compare.
const SKIPPED_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Default, Deserialize)]
struct ValidationScores {
    consistency_score: Option<f64>,
    fact_check_score: Option<f64>,
    timeline_coherence: Option<f64>,
    logical_consistency: Option<f64>,
    pattern_validation: Option<f64>,
}

impl ValidationScores {
    fn mean(&self) -> Option<f64> {
        confidence::mean(
            [
                self.consistency_score,
                self.fact_check_score,
                self.timeline_coherence,
                self.logical_consistency,
                self.pattern_validation,
            ]
            .into_iter()
            .flatten(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ValidationIssue {
    #[serde(rename = "type", default)]
    issue_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: String,
    #[serde(default, deserialize_with = "lenient_vec")]
    affected_entities: Vec<String>,
    #[serde(default)]
    suggested_fix: String,
}

#[derive(Debug, Deserialize)]
struct ValidationReply {
    #[serde(default)]
    validation_results: ValidationScores,
    #[serde(default, deserialize_with = "lenient_vec")]
    issues_found: Vec<ValidationIssue>,
    #[serde(default, deserialize_with = "lenient_vec")]
    validated_entities: Vec<ExtractedEntity>,
    #[serde(default, deserialize_with = "lenient_vec")]
    validated_relationships: Vec<ExtractedRelationship>,
    confidence: Option<f64>,
}

/// Stage 3: check earlier passes against each other and the article.
pub struct CrossReferenceValidation {
    model: Arc<dyn LanguageModel>,
}

impl CrossReferenceValidation {
    /// Create the processor over a shared model
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageProcessor for CrossReferenceValidation {
    fn kind(&self) -> StageKind {
        StageKind::CrossReference
    }

    fn description(&self) -> &'static str {
        "Check internal consistency, identify conflicts, and validate against known patterns"
    }

    async fn process(&self, ctx: StageContext<'_>, stage: &mut AnalysisStage) -> StageResult<()> {
        if !ctx.config.enable_cross_reference {
            return pass_through(
                &ctx,
                self.kind(),
                stage,
                "Cross-reference validation disabled by configuration",
            );
        }

        let last = ctx.last_result(self.kind())?.clone();
        if ctx.previous_results.len() < 2 {
            stage.results = Some(last);
            stage.confidence = SKIPPED_CONFIDENCE;
            stage.insights.push(
                "Cross-reference validation skipped - insufficient previous stages".to_string(),
            );
            return Ok(());
        }

        let user = format!(
            "Cross-reference and validate the analysis results for consistency and accuracy.\n\n\
             Previous analysis stages:\n{}\n\n{}",
            serialize_for_prompt(ctx.previous_results, "cross_reference.previous"),
            article_block(ctx.article)
        );
        let completion =
            invoke_model(self.model.as_ref(), self.kind(), CROSS_REFERENCE_PROMPT, user).await?;
        let reply: ValidationReply = parse_reply(self.kind(), &completion)?;

        let entities = if reply.validated_entities.is_empty() {
            last.entities
        } else {
            reply.validated_entities
        };
        let relationships = if reply.validated_relationships.is_empty() {
            last.relationships
        } else {
            reply.validated_relationships
        };
        let mut result = ExtractionResult::new(entities, relationships, 0.0);
        result.stamp(&ctx.article.id, Utc::now());
        let scores = &reply.validation_results;
        result.confidence = confidence::resolve(reply.confidence, || {
            scores.mean().unwrap_or_else(|| confidence::extraction(&result))
        });

        for issue in &reply.issues_found {
            let weight = confidence::severity_weight(&issue.severity);
            let mut evidence = Evidence::new(
                EvidenceKind::Validation,
                stage.stage_number,
                &issue.description,
            )
            .with_context(&issue.suggested_fix)
            .with_source(self.name())
            .with_confidence(weight)
            .with_metadata(serde_json::json!({
                "issue_type": issue.issue_type,
                "severity": issue.severity,
                "affected_entities": issue.affected_entities,
            }));
            if let Some(first) = issue.affected_entities.first() {
                evidence = evidence.with_entity(first);
            }
            let issue_id = ctx.ledger.add_evidence(evidence);

            for entity_id in &issue.affected_entities {
                let targets: Vec<String> = ctx
                    .ledger
                    .evidence_for_entity(entity_id)
                    .into_iter()
                    .filter(|e| e.kind == EvidenceKind::Entity)
                    .map(|e| e.id.clone())
                    .collect();
                for target in targets {
                    ctx.ledger.link(
                        CrossReferenceKind::Contradicts,
                        &issue_id,
                        &target,
                        &issue.issue_type,
                        weight,
                    );
                }
            }
        }

        stage.insights.push(format!(
            "Consistency score: {:.2}",
            scores.consistency_score.unwrap_or(0.0)
        ));
        stage
            .insights
            .push(format!("Found {} validation issues", reply.issues_found.len()));
        stage
            .insights
            .push("Cross-reference validation completed".to_string());
        stage.confidence = result.confidence;
        stage.results = Some(result);
        Ok(())
    }
}
