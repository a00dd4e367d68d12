//! Confidence scoring and aggregation.

use super::types::{AnalysisStage, ExtractionResult, StageStatus};

/// Clamp to [0.0, 1.0]; NaN becomes 0.0.
pub(crate) fn clamp(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Prefer the model's self-reported confidence when it gave a finite one.
/// A reported zero is kept; only a missing or non-finite value falls back.
pub(crate) fn resolve(reported: Option<f64>, fallback: impl FnOnce() -> f64) -> f64 {
    match reported {
        Some(value) if value.is_finite() => clamp(value),
        _ => clamp(fallback()),
    }
}

/// Arithmetic mean, or `None` for an empty input.
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + clamp(v), count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean item confidence across entities and relationships.
pub(crate) fn extraction(result: &ExtractionResult) -> f64 {
    mean(
        result
            .entities
            .iter()
            .map(|e| e.confidence)
            .chain(result.relationships.iter().map(|r| r.confidence)),
    )
    .unwrap_or(0.0)
}

/// Map an issue severity label to how much it should weigh.
pub(crate) fn severity_weight(severity: &str) -> f64 {
    match severity.trim().to_lowercase().as_str() {
        "high" | "critical" => 0.9,
        "medium" | "moderate" | "important" => 0.6,
        "low" | "minor" => 0.3,
        _ => 0.5,
    }
}

/// Mean confidence of completed stages.
pub(crate) fn overall(stages: &[AnalysisStage]) -> f64 {
    mean(
        stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .map(|s| s.confidence),
    )
    .unwrap_or(0.0)
}

/// Insight appended to a stage whose confidence fell short of the threshold.
pub fn low_confidence_insight(confidence: f64, threshold: f64) -> String {
    format!(
        "Low confidence: {:.2} (threshold: {:.2})",
        confidence, threshold
    )
}
