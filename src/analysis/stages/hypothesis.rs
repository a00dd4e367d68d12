use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{article_block, invoke_model, parse_reply, pass_through, StageContext, StageProcessor};
use crate::analysis::confidence;
use crate::analysis::ledger::{Evidence, EvidenceKind, Hypothesis, HypothesisChange, Ledger};
use crate::analysis::serialize_for_prompt;
use crate::analysis::types::{lenient_vec, AnalysisStage};
use crate::analysis::StageKind;
use crate::error::StageResult;
use crate::langbase::LanguageModel;
use crate::prompts::HYPOTHESIS_GENERATION_PROMPT;

/// Confidence assumed for a hypothesis the model did not score.
const UNSCORED_HYPOTHESIS_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Deserialize)]
struct ProposedHypothesis {
    #[serde(default)]
    id: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "type", default)]
    hypothesis_type: String,
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_vec")]
    supporting_evidence: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    contradicting_evidence: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    required_evidence: Vec<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    implications: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MissingInformation {
    #[serde(rename = "type", default)]
    gap_type: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    importance: String,
    #[serde(default, deserialize_with = "lenient_vec")]
    potential_sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HypothesisReply {
    #[serde(default, deserialize_with = "lenient_vec")]
    hypotheses: Vec<ProposedHypothesis>,
    #[serde(default, deserialize_with = "lenient_vec")]
    missing_information: Vec<MissingInformation>,
    #[serde(default, deserialize_with = "lenient_vec")]
    follow_up_questions: Vec<String>,
    confidence: Option<f64>,
}

/// Evidence as listed in the prompt so the model can cite it by id.
#[derive(Serialize)]
struct CitableEvidence<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: EvidenceKind,
    text: &'a str,
}

fn citable_evidence(ledger: &Ledger) -> Vec<CitableEvidence<'_>> {
    ledger
        .all_evidence()
        .map(|e| CitableEvidence {
            id: &e.id,
            kind: e.kind,
            text: &e.text,
        })
        .collect()
}

/// Stage 4: candidate explanations, information gaps and follow-up questions.
pub struct HypothesisGeneration {
    model: Arc<dyn LanguageModel>,
}

impl HypothesisGeneration {
    /// Create the processor over a shared model
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageProcessor for HypothesisGeneration {
    fn kind(&self) -> StageKind {
        StageKind::HypothesisGeneration
    }

    fn description(&self) -> &'static str {
        "Generate possible explanations, identify missing information, and suggest follow-up investigations"
    }

    async fn process(&self, ctx: StageContext<'_>, stage: &mut AnalysisStage) -> StageResult<()> {
        if !ctx.config.enable_hypotheses {
            return pass_through(
                &ctx,
                self.kind(),
                stage,
                "Hypothesis generation disabled by configuration",
            );
        }

        let last = ctx.last_result(self.kind())?.clone();
        let user = format!(
            "Based on the analysis results, generate hypotheses and identify gaps in information.\n\n\
             Analysis results so far:\n{}\n\n\
             Evidence gathered so far (cite by id):\n{}\n\n{}",
            serialize_for_prompt(ctx.previous_results, "hypothesis.previous"),
            serialize_for_prompt(&citable_evidence(ctx.ledger), "hypothesis.evidence"),
            article_block(ctx.article)
        );
        let completion =
            invoke_model(self.model.as_ref(), self.kind(), HYPOTHESIS_GENERATION_PROMPT, user)
                .await?;
        let reply: HypothesisReply = parse_reply(self.kind(), &completion)?;

        let stage_number = stage.stage_number;
        let source = self.name();
        let mut created = 0usize;
        let mut revised = 0usize;

        for proposed in reply.hypotheses {
            let value = proposed
                .confidence
                .map(confidence::clamp)
                .unwrap_or(UNSCORED_HYPOTHESIS_CONFIDENCE);
            let mut hypothesis = Hypothesis::new(stage_number, proposed.description)
                .with_id(proposed.id)
                .with_confidence(value)
                .with_implications(proposed.implications);
            if !proposed.hypothesis_type.trim().is_empty() {
                hypothesis = hypothesis.with_type(proposed.hypothesis_type);
            }

            let mut resolve = |reference: &String, kind: EvidenceKind| {
                ctx.ledger
                    .resolve_reference(reference, kind, stage_number, source, value)
            };
            hypothesis.supporting_evidence = proposed
                .supporting_evidence
                .iter()
                .filter_map(|r| resolve(r, EvidenceKind::Inference))
                .collect();
            hypothesis.contradicting_evidence = proposed
                .contradicting_evidence
                .iter()
                .filter_map(|r| resolve(r, EvidenceKind::Inference))
                .collect();
            hypothesis.required_evidence = proposed
                .required_evidence
                .iter()
                .filter_map(|r| resolve(r, EvidenceKind::Gap))
                .collect();

            match ctx.ledger.record_hypothesis(hypothesis) {
                HypothesisChange::Created => created += 1,
                HypothesisChange::Revised => revised += 1,
            }
        }

        for gap in &reply.missing_information {
            if gap.description.trim().is_empty() {
                continue;
            }
            ctx.ledger.add_evidence(
                Evidence::new(EvidenceKind::Gap, stage_number, &gap.description)
                    .with_source(source)
                    .with_confidence(confidence::severity_weight(&gap.importance))
                    .with_metadata(serde_json::json!({
                        "gap_type": gap.gap_type,
                        "importance": gap.importance,
                        "potential_sources": gap.potential_sources,
                    })),
            );
        }

        debug!(
            session_id = %ctx.session_id,
            created,
            revised,
            gaps = reply.missing_information.len(),
            "Hypotheses recorded"
        );

        let ledger: &Ledger = ctx.ledger;
        let fallback = || {
            confidence::mean(
                ledger
                    .hypotheses()
                    .filter(|h| h.stage == stage_number)
                    .map(|h| h.confidence),
            )
            .unwrap_or(0.0)
        };
        stage.confidence = confidence::resolve(reply.confidence, fallback);
        stage
            .insights
            .push(format!("Generated {} hypotheses", created + revised));
        stage.insights.push(format!(
            "Identified {} information gaps",
            reply.missing_information.len()
        ));
        stage
            .insights
            .extend(reply.follow_up_questions.iter().cloned());
        stage.questions = reply.follow_up_questions;
        stage.results = Some(last);
        Ok(())
    }
}
