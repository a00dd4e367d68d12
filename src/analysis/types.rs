//! Data model for articles, extraction results, stages and sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::confidence;
use super::ledger::Ledger;
use super::StageKind;
use crate::error::{AnalysisError, AnalysisResult};

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accept a JSON array of `T`, treating anything else (a string, `null`,
/// a malformed list) as empty. Models occasionally echo placeholders
/// such as `"mentions": "same_as_before"`.
pub(crate) fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(_) => serde_json::from_value(value).unwrap_or_default(),
        _ => Vec::new(),
    })
}

// ============================================================================
// Article
// ============================================================================

/// Normalized news article supplied by the acquisition step.
///
/// The pipeline treats it as read-only input passed to every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Stable id; generated when absent from the input.
    #[serde(default = "new_id")]
    pub id: String,
    /// Canonical URL.
    #[serde(default)]
    pub url: String,
    /// Headline.
    pub title: String,
    /// Full body text.
    pub content: String,
    /// Publication name.
    #[serde(default)]
    pub source: String,
    /// Byline, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publication date, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    /// Free-form acquisition metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Article {
    /// Create an article with a fresh id.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            url: String::new(),
            title: title.into(),
            content: content.into(),
            source: String::new(),
            author: None,
            publish_date: None,
            metadata: None,
        }
    }

    /// Set the canonical URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the publication the article came from
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the author
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set the publication date
    pub fn with_publish_date(mut self, date: DateTime<Utc>) -> Self {
        self.publish_date = Some(date);
        self
    }
}

// ============================================================================
// Extraction Result
// ============================================================================

/// Where an entity is mentioned in the article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    /// The quoted mention.
    #[serde(default)]
    pub text: String,
    /// Surrounding sentence.
    #[serde(default)]
    pub context: String,
}

/// An entity found in an article.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Entity id, unique within a result.
    #[serde(default)]
    pub id: String,
    /// Category such as person or organization.
    #[serde(rename = "type", default)]
    pub entity_type: String,
    /// Canonical name.
    #[serde(default)]
    pub name: String,
    /// Attributes reported by the model.
    #[serde(default, deserialize_with = "lenient_map")]
    pub properties: HashMap<String, serde_json::Value>,
    /// Extraction confidence (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
    /// Where the entity appears.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub mentions: Vec<EntityMention>,
    /// Source article.
    #[serde(default, alias = "articleId")]
    pub article_id: String,
    /// When the owning stage produced it.
    #[serde(default, alias = "extractedAt")]
    pub extracted_at: Option<DateTime<Utc>>,
}

/// A relationship between two extracted entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    /// Relationship id.
    #[serde(default)]
    pub id: String,
    /// Kind of link, e.g. employs.
    #[serde(rename = "type", default)]
    pub relationship_type: String,
    /// Source entity id.
    #[serde(default, alias = "fromId")]
    pub from_id: String,
    /// Target entity id.
    #[serde(default, alias = "toId")]
    pub to_id: String,
    /// Attributes reported by the model.
    #[serde(default, deserialize_with = "lenient_map")]
    pub properties: HashMap<String, serde_json::Value>,
    /// Extraction confidence (0.0-1.0).
    #[serde(default)]
    pub confidence: f64,
    /// Supporting passage.
    #[serde(default)]
    pub context: String,
    /// Source article.
    #[serde(default, alias = "articleId")]
    pub article_id: String,
    /// When the owning stage produced it.
    #[serde(default, alias = "extractedAt")]
    pub extracted_at: Option<DateTime<Utc>>,
}

fn lenient_map<'de, D>(deserializer: D) -> Result<HashMap<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    })
}

/// Entities and relationships produced by one stage, with the stage's
/// overall confidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Entities found.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub entities: Vec<ExtractedEntity>,
    /// Relationships between them.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub relationships: Vec<ExtractedRelationship>,
    /// Overall confidence of the result.
    #[serde(default)]
    pub confidence: f64,
}

impl ExtractionResult {
    /// Build a result from parsed items.
    pub fn new(
        entities: Vec<ExtractedEntity>,
        relationships: Vec<ExtractedRelationship>,
        confidence: f64,
    ) -> Self {
        Self {
            entities,
            relationships,
            confidence: confidence::clamp(confidence),
        }
    }

    /// True when the result carries no entities and no relationships.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    /// Attribute every item to `article_id`, fill in missing ids and
    /// clamp item confidences.
    pub fn stamp(&mut self, article_id: &str, now: DateTime<Utc>) {
        for entity in &mut self.entities {
            if entity.id.trim().is_empty() {
                entity.id = new_id();
            }
            entity.article_id = article_id.to_string();
            entity.extracted_at = Some(now);
            entity.confidence = confidence::clamp(entity.confidence);
        }
        for relationship in &mut self.relationships {
            if relationship.id.trim().is_empty() {
                relationship.id = new_id();
            }
            relationship.article_id = article_id.to_string();
            relationship.extracted_at = Some(now);
            relationship.confidence = confidence::clamp(relationship.confidence);
        }
    }

    /// Look up an entity by id.
    pub fn entity(&self, id: &str) -> Option<&ExtractedEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

// ============================================================================
// Analysis Config
// ============================================================================

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Per-session configuration, fixed when the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Requested number of stages.
    pub depth: usize,
    /// Hard cap on the number of stages.
    pub max_stages: usize,
    /// Soft minimum per-stage confidence (0.0-1.0).
    pub confidence_threshold: f64,
    /// Upper bound on a single stage's run time.
    #[serde(rename = "timeout_per_stage_ms", with = "duration_ms")]
    pub timeout_per_stage: Duration,
    /// Run cross-reference validation.
    pub enable_cross_reference: bool,
    /// Run hypothesis generation.
    pub enable_hypotheses: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            depth: 3,
            max_stages: 5,
            confidence_threshold: 0.6,
            timeout_per_stage: Duration::from_secs(30),
            enable_cross_reference: true,
            enable_hypotheses: true,
        }
    }
}

impl AnalysisConfig {
    /// Set the requested depth
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Set the stage cap
    pub fn with_max_stages(mut self, max_stages: usize) -> Self {
        self.max_stages = max_stages;
        self
    }

    /// Set the soft confidence threshold
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set the per-stage timeout
    pub fn with_timeout_per_stage(mut self, timeout: Duration) -> Self {
        self.timeout_per_stage = timeout;
        self
    }

    /// Enable or disable the cross-reference stage
    pub fn with_cross_reference(mut self, enabled: bool) -> Self {
        self.enable_cross_reference = enabled;
        self
    }

    /// Enable or disable the hypothesis stage
    pub fn with_hypotheses(mut self, enabled: bool) -> Self {
        self.enable_hypotheses = enabled;
        self
    }

    /// `min(depth, max_stages, registered)`.
    pub fn effective_stage_count(&self, registered: usize) -> usize {
        self.depth.min(self.max_stages).min(registered)
    }

    /// Validate the config against the number of registered processors and
    /// return the number of stages a session will run.
    pub fn validate(&self, registered: usize) -> AnalysisResult<usize> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(AnalysisError::InvalidConfig {
                message: format!(
                    "confidence_threshold must be within 0.0-1.0, got {}",
                    self.confidence_threshold
                ),
            });
        }
        if self.timeout_per_stage.is_zero() {
            return Err(AnalysisError::InvalidConfig {
                message: "timeout_per_stage must be greater than zero".to_string(),
            });
        }
        let count = self.effective_stage_count(registered);
        if count == 0 {
            return Err(AnalysisError::InvalidConfig {
                message: format!(
                    "no eligible stages (depth={}, max_stages={}, registered={})",
                    self.depth, self.max_stages, registered
                ),
            });
        }
        Ok(count)
    }
}

// ============================================================================
// Lifecycle states
// ============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Stages still executing.
    Running,
    /// Every stage finished.
    Completed,
    /// A stage failed.
    Failed,
    /// Stopped by the caller.
    Terminated,
}

impl SessionStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Terminated => "terminated",
        }
    }

    /// Terminal states have no transitions out.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "terminated" => Ok(SessionStatus::Terminated),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Stage lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started.
    #[default]
    Pending,
    /// Executing.
    Running,
    /// Finished with a result.
    Completed,
    /// Failed, timed out or cut off by termination.
    Failed,
}

impl StageStatus {
    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            _ => Err(format!("Unknown stage status: {}", s)),
        }
    }
}

// ============================================================================
// Stage and Session
// ============================================================================

/// One step of a session's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStage {
    /// 1-based position, fixed at session creation.
    pub stage_number: usize,
    /// Which processor runs it.
    pub kind: StageKind,
    /// Display name.
    pub name: String,
    /// What the stage does.
    pub description: String,
    /// Lifecycle state.
    pub status: StageStatus,
    /// Set when it enters running.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when it finishes.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result of a completed stage.
    pub results: Option<ExtractionResult>,
    /// Stage confidence (0.0-1.0).
    pub confidence: f64,
    /// Findings in reading order.
    pub insights: Vec<String>,
    /// Open questions raised by the stage.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisStage {
    /// Pre-allocate a pending stage.
    pub fn new(
        stage_number: usize,
        kind: StageKind,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            stage_number,
            kind,
            name: name.into(),
            description: description.into(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            results: None,
            confidence: 0.0,
            insights: Vec::new(),
            questions: Vec::new(),
            error: None,
        }
    }
}

/// Full state of one article's pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    /// Session id.
    pub id: String,
    /// Article being analyzed.
    pub article_id: String,
    /// Config fixed at start.
    pub config: AnalysisConfig,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Set on entering a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason for failed sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pre-allocated stages in run order.
    pub stages: Vec<AnalysisStage>,
    /// One entry per completed stage that produced a result, in stage order.
    pub results: Vec<ExtractionResult>,
    /// Evidence, hypotheses and cross references.
    #[serde(flatten)]
    pub ledger: Ledger,
}

impl AnalysisSession {
    /// Create a running session over pre-allocated stages.
    pub fn new(
        article_id: impl Into<String>,
        config: AnalysisConfig,
        stages: Vec<AnalysisStage>,
    ) -> Self {
        Self {
            id: new_id(),
            article_id: article_id.into(),
            config,
            status: SessionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            stages,
            results: Vec::new(),
            ledger: Ledger::default(),
        }
    }

    /// Look up a stage by its 1-based number.
    pub fn stage(&self, stage_number: usize) -> Option<&AnalysisStage> {
        stage_number
            .checked_sub(1)
            .and_then(|index| self.stages.get(index))
    }

    /// Stages that reached `completed`.
    pub fn completed_stages(&self) -> impl Iterator<Item = &AnalysisStage> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
    }

    /// Whether the session has left `running`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mean confidence over completed stages.
    pub fn overall_confidence(&self) -> f64 {
        confidence::overall(&self.stages)
    }
}
