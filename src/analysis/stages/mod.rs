//! Stage processors.
//!
//! Each processor builds its prompt, calls the [`LanguageModel`], parses the
//! reply and fills in the stage record it was handed. Processors touch the
//! session only through [`StageContext::ledger`]; status and other stages
//! belong to the controller.
//!
//! All ledger and stage writes happen after the model call returns, so a
//! processor cut short by the stage timeout leaves no partial state behind.

mod cross_reference;
mod deep;
mod hypothesis;
mod refinement;
mod surface;

pub use cross_reference::CrossReferenceValidation;
pub use deep::DeepAnalysis;
pub use hypothesis::HypothesisGeneration;
pub use refinement::RecursiveRefinement;
pub use surface::SurfaceExtraction;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::ledger::Ledger;
use super::types::{AnalysisConfig, AnalysisStage, Article, ExtractionResult};
use super::{extract_json_from_completion, StageKind};
use crate::error::{StageError, StageResult};
use crate::langbase::{LanguageModel, Message};

/// Everything a processor may read, plus the session ledger it may extend.
pub struct StageContext<'a> {
    /// Owning session, for logs.
    pub session_id: &'a str,
    /// The article under analysis.
    pub article: &'a Article,
    /// Session config.
    pub config: &'a AnalysisConfig,
    /// Stages before the one being processed, all completed.
    pub prior_stages: &'a [AnalysisStage],
    /// Results of every completed stage, in stage order.
    pub previous_results: &'a [ExtractionResult],
    /// Scratch copy of the ledger, committed only on success.
    pub ledger: &'a mut Ledger,
}

impl StageContext<'_> {
    /// The most recent result, required by every stage after the first.
    pub fn last_result(&self, kind: StageKind) -> StageResult<&ExtractionResult> {
        self.previous_results
            .last()
            .ok_or_else(|| StageError::MissingInput {
                stage: kind.display_name().to_string(),
                message: "no previous results to analyze".to_string(),
            })
    }
}

/// One step of the analysis pipeline.
#[async_trait]
pub trait StageProcessor: Send + Sync {
    /// Which pipeline step this is.
    fn kind(&self) -> StageKind;

    /// Stage title recorded on the session.
    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// What the stage does, recorded on the session.
    fn description(&self) -> &'static str;

    /// Run the stage, writing results, confidence and insights into `stage`.
    async fn process(&self, ctx: StageContext<'_>, stage: &mut AnalysisStage) -> StageResult<()>;
}

/// The five processors in pipeline order, sharing one model.
pub fn standard_pipeline(model: Arc<dyn LanguageModel>) -> Vec<Arc<dyn StageProcessor>> {
    vec![
        Arc::new(SurfaceExtraction::new(model.clone())),
        Arc::new(DeepAnalysis::new(model.clone())),
        Arc::new(CrossReferenceValidation::new(model.clone())),
        Arc::new(HypothesisGeneration::new(model.clone())),
        Arc::new(RecursiveRefinement::new(model)),
    ]
}

/// Send a system prompt plus one user message and return the raw reply.
pub(crate) async fn invoke_model(
    model: &dyn LanguageModel,
    kind: StageKind,
    system_prompt: &str,
    user_message: String,
) -> StageResult<String> {
    let start = Instant::now();
    debug!(stage = %kind, "Invoking language model");

    let messages = vec![Message::system(system_prompt), Message::user(user_message)];
    match model.generate(messages).await {
        Ok(completion) => {
            info!(
                stage = %kind,
                latency_ms = start.elapsed().as_millis() as u64,
                reply_chars = completion.len(),
                "Language model replied"
            );
            Ok(completion)
        }
        Err(e) => {
            warn!(
                stage = %kind,
                error = %e,
                latency_ms = start.elapsed().as_millis() as u64,
                "Language model call failed"
            );
            Err(e.into())
        }
    }
}

/// Parse the JSON payload of a model reply.
pub(crate) fn parse_reply<T: DeserializeOwned>(kind: StageKind, completion: &str) -> StageResult<T> {
    let parse_error = |message: String| StageError::Parse {
        stage: kind.display_name().to_string(),
        message,
    };
    let json = extract_json_from_completion(completion).map_err(parse_error)?;
    serde_json::from_str(json).map_err(|e| parse_error(e.to_string()))
}

/// Render the article as prompt text.
pub(crate) fn article_block(article: &Article) -> String {
    let mut block = format!("Title: {}\n", article.title);
    if !article.url.is_empty() {
        block.push_str(&format!("URL: {}\n", article.url));
    }
    if !article.source.is_empty() {
        block.push_str(&format!("Source: {}\n", article.source));
    }
    if let Some(author) = &article.author {
        block.push_str(&format!("Author: {}\n", author));
    }
    if let Some(date) = &article.publish_date {
        block.push_str(&format!("Published: {}\n", date.to_rfc3339()));
    }
    block.push_str(&format!("\nContent:\n{}", article.content));
    block
}

/// Carry the last result forward unchanged.
pub(crate) fn pass_through(
    ctx: &StageContext<'_>,
    kind: StageKind,
    stage: &mut AnalysisStage,
    insight: &str,
) -> StageResult<()> {
    let last = ctx.last_result(kind)?.clone();
    stage.confidence = last.confidence;
    stage.results = Some(last);
    stage.insights.push(insight.to_string());
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::analysis::types::{ExtractedEntity, ExtractedRelationship};
    use crate::langbase::MockLanguageModel;

    pub fn article() -> Article {
        Article::new(
            "Council contract awarded to mayor's brother-in-law",
            "The city council awarded a $2M paving contract to Ridge Paving, owned by the mayor's brother-in-law.",
        )
        .with_source("Daily Ledger")
    }

    pub fn model_replying(reply: &'static str) -> Arc<dyn LanguageModel> {
        let mut mock = MockLanguageModel::new();
        mock.expect_generate()
            .times(1)
            .returning(move |_| Ok(reply.to_string()));
        Arc::new(mock)
    }

    pub fn unused_model() -> Arc<dyn LanguageModel> {
        let mut mock = MockLanguageModel::new();
        mock.expect_generate().times(0);
        Arc::new(mock)
    }

    pub fn stage(number: usize, kind: StageKind) -> AnalysisStage {
        AnalysisStage::new(number, kind, kind.display_name(), "")
    }

    pub fn sample_result(confidence: f64) -> ExtractionResult {
        ExtractionResult::new(
            vec![
                ExtractedEntity {
                    id: "e1".to_string(),
                    entity_type: "person".to_string(),
                    name: "Mayor Dana Holt".to_string(),
                    confidence: 0.9,
                    ..Default::default()
                },
                ExtractedEntity {
                    id: "e2".to_string(),
                    entity_type: "organization".to_string(),
                    name: "Ridge Paving".to_string(),
                    confidence: 0.8,
                    ..Default::default()
                },
            ],
            vec![ExtractedRelationship {
                id: "r1".to_string(),
                relationship_type: "ownership".to_string(),
                from_id: "e1".to_string(),
                to_id: "e2".to_string(),
                confidence: 0.7,
                ..Default::default()
            }],
            confidence,
        )
    }

    pub fn context<'a>(
        article: &'a Article,
        config: &'a AnalysisConfig,
        previous_results: &'a [ExtractionResult],
        ledger: &'a mut Ledger,
    ) -> StageContext<'a> {
        StageContext {
            session_id: "test-session",
            article,
            config,
            prior_stages: &[],
            previous_results,
            ledger,
        }
    }
}
