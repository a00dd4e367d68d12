//! Sequential investigative analysis.
//!
//! An article is run through a fixed pipeline of up to five stages, each
//! backed by a [`StageProcessor`]:
//! - [`SurfaceExtraction`]: entities and relationships
//! - [`DeepAnalysis`]: roles, motivations and patterns
//! - [`CrossReferenceValidation`]: consistency checks across earlier passes
//! - [`HypothesisGeneration`]: candidate explanations and information gaps
//! - [`RecursiveRefinement`]: final synthesis and hypothesis revision
//!
//! The [`AnalysisController`] owns sessions, runs each one on its own task
//! and publishes immutable snapshots that callers poll or subscribe to.

mod confidence;
mod controller;
mod ledger;
mod session;
mod stages;
mod types;

pub use confidence::low_confidence_insight;
pub use controller::AnalysisController;
pub use ledger::*;
pub use session::{SessionHandle, TERMINATED_STAGE_ERROR};
pub use stages::{
    standard_pipeline, CrossReferenceValidation, DeepAnalysis, HypothesisGeneration,
    RecursiveRefinement, StageContext, StageProcessor, SurfaceExtraction,
};
pub use types::*;

use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// Shared Utilities
// ============================================================================

/// Serialize a value to pretty JSON for inclusion in a prompt.
///
/// Serialization failures are logged and replaced by an empty object so a
/// prompt is always produced.
pub(crate) fn serialize_for_prompt<T: Serialize + ?Sized>(value: &T, context: &str) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for prompt"
        );
        "{}".to_string()
    })
}

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
/// 4. The outermost `{ ... }` span, for replies with prose around the object
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(&trimmed[start..=end]);
        }
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

// ============================================================================
// Stage kinds
// ============================================================================

/// The five pipeline stages, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Entities and relationships straight from the text.
    SurfaceExtraction,
    /// Roles, relationship strength, motivations, patterns.
    DeepAnalysis,
    /// Consistency validation across earlier stages.
    CrossReference,
    /// Candidate explanations and missing information.
    HypothesisGeneration,
    /// Final synthesis of everything gathered.
    RecursiveRefinement,
}

impl StageKind {
    /// Every stage in pipeline order.
    pub const ALL: [StageKind; 5] = [
        StageKind::SurfaceExtraction,
        StageKind::DeepAnalysis,
        StageKind::CrossReference,
        StageKind::HypothesisGeneration,
        StageKind::RecursiveRefinement,
    ];

    /// Get the stage name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::SurfaceExtraction => "surface_extraction",
            StageKind::DeepAnalysis => "deep_analysis",
            StageKind::CrossReference => "cross_reference",
            StageKind::HypothesisGeneration => "hypothesis_generation",
            StageKind::RecursiveRefinement => "recursive_refinement",
        }
    }

    /// Human-readable stage title.
    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::SurfaceExtraction => "Surface Extraction",
            StageKind::DeepAnalysis => "Deep Analysis",
            StageKind::CrossReference => "Cross-Reference Validation",
            StageKind::HypothesisGeneration => "Hypothesis Generation",
            StageKind::RecursiveRefinement => "Recursive Refinement",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "surface_extraction" => Ok(StageKind::SurfaceExtraction),
            "deep_analysis" => Ok(StageKind::DeepAnalysis),
            "cross_reference" => Ok(StageKind::CrossReference),
            "hypothesis_generation" => Ok(StageKind::HypothesisGeneration),
            "recursive_refinement" => Ok(StageKind::RecursiveRefinement),
            _ => Err(format!("Unknown stage kind: {}", s)),
        }
    }
}
