//! Evidence and hypothesis ledger kept inside each session.
//!
//! Evidence is append-only. Hypotheses are replaced wholesale on every
//! revision so a snapshot never holds a half-updated record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::confidence;

/// Confidence at or above which a revised hypothesis counts as supported.
pub const SUPPORTED_THRESHOLD: f64 = 0.7;
/// Confidence at or below which a revised hypothesis counts as refuted.
pub const REFUTED_THRESHOLD: f64 = 0.3;

// ============================================================================
// Evidence
// ============================================================================

/// What an evidence record attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// An extracted entity.
    Entity,
    /// An extracted relationship.
    Relationship,
    /// A recurring pattern spotted during deep analysis.
    Pattern,
    /// An issue raised by cross-reference validation.
    Validation,
    /// A free-text claim cited by a hypothesis.
    Inference,
    /// Information that is missing and would change the picture.
    Gap,
}

impl EvidenceKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Entity => "entity",
            EvidenceKind::Relationship => "relationship",
            EvidenceKind::Pattern => "pattern",
            EvidenceKind::Validation => "validation",
            EvidenceKind::Inference => "inference",
            EvidenceKind::Gap => "gap",
        }
    }
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EvidenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entity" => Ok(EvidenceKind::Entity),
            "relationship" => Ok(EvidenceKind::Relationship),
            "pattern" => Ok(EvidenceKind::Pattern),
            "validation" => Ok(EvidenceKind::Validation),
            "inference" => Ok(EvidenceKind::Inference),
            "gap" => Ok(EvidenceKind::Gap),
            _ => Err(format!("Unknown evidence kind: {}", s)),
        }
    }
}

/// An atomic, attributable fact gathered during a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Unique within the session.
    pub id: String,
    /// What sort of fact it is.
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    /// Origin stage number.
    pub stage: usize,
    /// Entity the fact is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// The fact itself.
    pub text: String,
    /// Surrounding detail.
    #[serde(default)]
    pub context: String,
    /// Stage name or external reference.
    #[serde(default)]
    pub source: String,
    /// Confidence (0.0-1.0).
    pub confidence: f64,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
    /// Extra structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Evidence {
    /// New evidence with a fresh id.
    pub fn new(kind: EvidenceKind, stage: usize, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            stage,
            entity_id: None,
            text: text.into(),
            context: String::new(),
            source: String::new(),
            confidence: 0.0,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Attach the entity this evidence is about
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the surrounding context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Set the source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the confidence (clamped to 0.0-1.0)
    pub fn with_confidence(mut self, value: f64) -> Self {
        self.confidence = confidence::clamp(value);
        self
    }

    /// Attach free-form metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ============================================================================
// Hypothesis
// ============================================================================

/// Where a hypothesis stands after its latest revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    /// Not yet assessed.
    #[default]
    Proposed,
    /// Confidence at or above 0.7.
    Supported,
    /// Confidence at or below 0.3.
    Refuted,
    /// Anything in between.
    Uncertain,
}

impl HypothesisStatus {
    /// Status of a revised hypothesis with the given confidence.
    pub fn from_confidence(value: f64) -> Self {
        if value >= SUPPORTED_THRESHOLD {
            HypothesisStatus::Supported
        } else if value <= REFUTED_THRESHOLD {
            HypothesisStatus::Refuted
        } else {
            HypothesisStatus::Uncertain
        }
    }

    /// Get the status name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            HypothesisStatus::Proposed => "proposed",
            HypothesisStatus::Supported => "supported",
            HypothesisStatus::Refuted => "refuted",
            HypothesisStatus::Uncertain => "uncertain",
        }
    }
}

impl std::fmt::Display for HypothesisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HypothesisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proposed" => Ok(HypothesisStatus::Proposed),
            "supported" => Ok(HypothesisStatus::Supported),
            "refuted" => Ok(HypothesisStatus::Refuted),
            "uncertain" => Ok(HypothesisStatus::Uncertain),
            _ => Err(format!("Unknown hypothesis status: {}", s)),
        }
    }
}

/// A candidate explanation linked to evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Unique within the session.
    pub id: String,
    /// Stage that proposed it.
    pub stage: usize,
    /// The claim.
    pub description: String,
    /// Category such as corruption or conflict_of_interest.
    #[serde(rename = "type")]
    pub hypothesis_type: String,
    /// Confidence (0.0-1.0).
    pub confidence: f64,
    /// Derived from confidence on every revision.
    pub status: HypothesisStatus,
    /// Evidence ids in favour.
    pub supporting_evidence: BTreeSet<String>,
    /// Evidence ids against.
    pub contradicting_evidence: BTreeSet<String>,
    /// What would still need to be found.
    pub required_evidence: BTreeSet<String>,
    /// Consequences if true.
    pub implications: Vec<String>,
    /// First recorded.
    pub created_at: DateTime<Utc>,
    /// Last revised.
    pub updated_at: DateTime<Utc>,
}

impl Hypothesis {
    /// New proposed hypothesis with a fresh id.
    pub fn new(stage: usize, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            stage,
            description: description.into(),
            hypothesis_type: "other".to_string(),
            confidence: 0.0,
            status: HypothesisStatus::Proposed,
            supporting_evidence: BTreeSet::new(),
            contradicting_evidence: BTreeSet::new(),
            required_evidence: BTreeSet::new(),
            implications: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Use a caller-supplied id (ignored when blank)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !id.trim().is_empty() {
            self.id = id;
        }
        self
    }

    /// Set the hypothesis type
    pub fn with_type(mut self, hypothesis_type: impl Into<String>) -> Self {
        self.hypothesis_type = hypothesis_type.into();
        self
    }

    /// Set the confidence (clamped to 0.0-1.0)
    pub fn with_confidence(mut self, value: f64) -> Self {
        self.confidence = confidence::clamp(value);
        self
    }

    /// Set the implications
    pub fn with_implications(mut self, implications: Vec<String>) -> Self {
        self.implications = implications;
        self
    }
}

/// Outcome of [`Ledger::record_hypothesis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypothesisChange {
    /// A new id was inserted.
    Created,
    /// An existing record was replaced.
    Revised,
}

/// A revision to an existing hypothesis, applied as a full replace.
#[derive(Debug, Clone, Default)]
pub struct HypothesisRevision {
    /// New confidence, if reported.
    pub confidence: Option<f64>,
    /// Evidence ids to add in favour.
    pub supporting_evidence: Vec<String>,
    /// Evidence ids to add against.
    pub contradicting_evidence: Vec<String>,
}

// ============================================================================
// Cross references
// ============================================================================

/// How two evidence records relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossReferenceKind {
    /// The first record backs the second.
    Supports,
    /// The records disagree.
    Contradicts,
    /// Related without a direction of support.
    Relates,
}

impl CrossReferenceKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            CrossReferenceKind::Supports => "supports",
            CrossReferenceKind::Contradicts => "contradicts",
            CrossReferenceKind::Relates => "relates",
        }
    }
}

impl std::str::FromStr for CrossReferenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "supports" => Ok(CrossReferenceKind::Supports),
            "contradicts" => Ok(CrossReferenceKind::Contradicts),
            "relates" => Ok(CrossReferenceKind::Relates),
            _ => Err(format!("Unknown cross reference kind: {}", s)),
        }
    }
}

/// A directed link between two evidence records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossReference {
    /// Unique within the session.
    pub id: String,
    /// Nature of the link.
    #[serde(rename = "type")]
    pub kind: CrossReferenceKind,
    /// Source evidence id.
    pub from_id: String,
    /// Target evidence id.
    pub to_id: String,
    /// Why they are linked.
    pub description: String,
    /// Link strength (0.0-1.0).
    pub strength: f64,
    /// When the link was made.
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Ledger
// ============================================================================

/// Evidence, hypotheses and cross references accumulated by one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    evidence: BTreeMap<String, Evidence>,
    #[serde(default)]
    hypotheses: BTreeMap<String, Hypothesis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    cross_references: Vec<CrossReference>,
}

impl Ledger {
    /// Append evidence and return its id. An id that is already present
    /// keeps its original record.
    pub fn add_evidence(&mut self, evidence: Evidence) -> String {
        let id = evidence.id.clone();
        self.evidence.entry(id.clone()).or_insert(evidence);
        id
    }

    /// Look up evidence by id.
    pub fn evidence(&self, id: &str) -> Option<&Evidence> {
        self.evidence.get(id)
    }

    /// All evidence, ordered by id.
    pub fn all_evidence(&self) -> impl Iterator<Item = &Evidence> {
        self.evidence.values()
    }

    /// Evidence produced by one stage.
    pub fn evidence_for_stage(&self, stage: usize) -> Vec<&Evidence> {
        self.evidence.values().filter(|e| e.stage == stage).collect()
    }

    /// Evidence about one entity.
    pub fn evidence_for_entity(&self, entity_id: &str) -> Vec<&Evidence> {
        self.evidence
            .values()
            .filter(|e| e.entity_id.as_deref() == Some(entity_id))
            .collect()
    }

    /// Number of evidence records.
    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }

    /// Turn a model-supplied reference into an evidence id.
    ///
    /// A reference naming an existing evidence id resolves to it; anything
    /// else becomes new evidence of `kind` whose text is the reference.
    /// Blank references resolve to nothing.
    pub fn resolve_reference(
        &mut self,
        reference: &str,
        kind: EvidenceKind,
        stage: usize,
        source: &str,
        confidence: f64,
    ) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if self.evidence.contains_key(reference) {
            return Some(reference.to_string());
        }
        Some(
            self.add_evidence(
                Evidence::new(kind, stage, reference)
                    .with_source(source)
                    .with_confidence(confidence),
            ),
        )
    }

    /// Insert a hypothesis, or replace the record with the same id.
    ///
    /// Replacement keeps the original `created_at` and derives the status
    /// from the new confidence.
    pub fn record_hypothesis(&mut self, mut hypothesis: Hypothesis) -> HypothesisChange {
        match self.hypotheses.get(&hypothesis.id) {
            Some(existing) => {
                hypothesis.created_at = existing.created_at;
                hypothesis.updated_at = Utc::now();
                hypothesis.status = HypothesisStatus::from_confidence(hypothesis.confidence);
                self.hypotheses.insert(hypothesis.id.clone(), hypothesis);
                HypothesisChange::Revised
            }
            None => {
                hypothesis.status = HypothesisStatus::Proposed;
                self.hypotheses.insert(hypothesis.id.clone(), hypothesis);
                HypothesisChange::Created
            }
        }
    }

    /// Apply a revision by building a new record and replacing the old one.
    /// Returns false when no hypothesis has that id.
    pub fn revise_hypothesis(&mut self, id: &str, revision: HypothesisRevision) -> bool {
        let Some(existing) = self.hypotheses.get(id) else {
            return false;
        };
        let mut revised = existing.clone();
        if let Some(value) = revision.confidence {
            revised.confidence = confidence::clamp(value);
        }
        revised
            .supporting_evidence
            .extend(revision.supporting_evidence);
        revised
            .contradicting_evidence
            .extend(revision.contradicting_evidence);
        self.record_hypothesis(revised);
        true
    }

    /// Look up a hypothesis by id.
    pub fn hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.hypotheses.get(id)
    }

    /// All hypotheses, ordered by id.
    pub fn hypotheses(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.values()
    }

    /// Number of hypotheses.
    pub fn hypothesis_count(&self) -> usize {
        self.hypotheses.len()
    }

    /// Link two existing evidence records. Returns the new cross-reference
    /// id, or `None` if either end is unknown.
    pub fn link(
        &mut self,
        kind: CrossReferenceKind,
        from_id: &str,
        to_id: &str,
        description: impl Into<String>,
        strength: f64,
    ) -> Option<String> {
        if !self.evidence.contains_key(from_id) || !self.evidence.contains_key(to_id) {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        self.cross_references.push(CrossReference {
            id: id.clone(),
            kind,
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            description: description.into(),
            strength: confidence::clamp(strength),
            created_at: Utc::now(),
        });
        Some(id)
    }

    /// Cross references in insertion order.
    pub fn cross_references(&self) -> &[CrossReference] {
        &self.cross_references
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_evidence_never_overwrites() {
        let mut ledger = Ledger::default();
        let first = Evidence::new(EvidenceKind::Entity, 1, "Acme Corp");
        let id = ledger.add_evidence(first.clone());

        let mut dup = Evidence::new(EvidenceKind::Pattern, 2, "other");
        dup.id = id.clone();
        ledger.add_evidence(dup);

        assert_eq!(ledger.evidence_count(), 1);
        assert_eq!(ledger.evidence(&id).unwrap().text, "Acme Corp");
    }

    #[test]
    fn test_evidence_lookup_by_stage_and_entity() {
        let mut ledger = Ledger::default();
        ledger.add_evidence(Evidence::new(EvidenceKind::Entity, 1, "Mayor").with_entity("e1"));
        ledger.add_evidence(Evidence::new(EvidenceKind::Pattern, 2, "kickbacks"));
        ledger.add_evidence(Evidence::new(EvidenceKind::Relationship, 1, "paid").with_entity("e1"));

        assert_eq!(ledger.evidence_for_stage(1).len(), 2);
        assert_eq!(ledger.evidence_for_stage(2).len(), 1);
        assert_eq!(ledger.evidence_for_entity("e1").len(), 2);
        assert!(ledger.evidence_for_entity("e9").is_empty());
    }

    #[test]
    fn test_resolve_reference_links_existing_or_creates() {
        let mut ledger = Ledger::default();
        let existing = ledger.add_evidence(Evidence::new(EvidenceKind::Entity, 1, "Mayor"));

        let linked = ledger
            .resolve_reference(&existing, EvidenceKind::Inference, 4, "test", 0.5)
            .unwrap();
        assert_eq!(linked, existing);
        assert_eq!(ledger.evidence_count(), 1);

        let created = ledger
            .resolve_reference("wire transfer in March", EvidenceKind::Inference, 4, "test", 0.5)
            .unwrap();
        assert_ne!(created, existing);
        let evidence = ledger.evidence(&created).unwrap();
        assert_eq!(evidence.kind, EvidenceKind::Inference);
        assert_eq!(evidence.stage, 4);

        assert!(ledger
            .resolve_reference("   ", EvidenceKind::Inference, 4, "test", 0.5)
            .is_none());
    }

    #[test]
    fn test_record_hypothesis_creates_then_revises() {
        let mut ledger = Ledger::default();
        let hypothesis = Hypothesis::new(4, "Contract steering").with_id("h1").with_confidence(0.5);
        assert_eq!(ledger.record_hypothesis(hypothesis), HypothesisChange::Created);
        let created_at = ledger.hypothesis("h1").unwrap().created_at;
        assert_eq!(ledger.hypothesis("h1").unwrap().status, HypothesisStatus::Proposed);

        let replacement = Hypothesis::new(4, "Contract steering via shell company")
            .with_id("h1")
            .with_confidence(0.8);
        assert_eq!(ledger.record_hypothesis(replacement), HypothesisChange::Revised);

        let stored = ledger.hypothesis("h1").unwrap();
        assert_eq!(stored.description, "Contract steering via shell company");
        assert_eq!(stored.created_at, created_at);
        assert_eq!(stored.status, HypothesisStatus::Supported);
        assert_eq!(ledger.hypothesis_count(), 1);
    }

    #[test]
    fn test_revise_hypothesis_replaces_record() {
        let mut ledger = Ledger::default();
        let mut hypothesis = Hypothesis::new(4, "Bribery").with_id("h1").with_confidence(0.6);
        hypothesis.supporting_evidence.insert("ev-a".to_string());
        ledger.record_hypothesis(hypothesis);

        assert!(ledger.revise_hypothesis(
            "h1",
            HypothesisRevision {
                confidence: Some(0.2),
                supporting_evidence: vec!["ev-b".to_string()],
                contradicting_evidence: vec!["ev-c".to_string()],
            }
        ));

        let stored = ledger.hypothesis("h1").unwrap();
        assert_eq!(stored.confidence, 0.2);
        assert_eq!(stored.status, HypothesisStatus::Refuted);
        assert_eq!(stored.supporting_evidence.len(), 2);
        assert!(stored.contradicting_evidence.contains("ev-c"));

        assert!(!ledger.revise_hypothesis("missing", HypothesisRevision::default()));
    }

    #[test]
    fn test_kind_names_parse_back() {
        for kind in [
            EvidenceKind::Entity,
            EvidenceKind::Relationship,
            EvidenceKind::Pattern,
            EvidenceKind::Validation,
            EvidenceKind::Inference,
            EvidenceKind::Gap,
        ] {
            assert_eq!(kind.as_str().parse::<EvidenceKind>().unwrap(), kind);
        }
        assert_eq!("Refuted".parse::<HypothesisStatus>().unwrap(), HypothesisStatus::Refuted);
        assert_eq!(
            "relates".parse::<CrossReferenceKind>().unwrap(),
            CrossReferenceKind::Relates
        );
        assert!("rumor".parse::<EvidenceKind>().is_err());
    }

    #[test]
    fn test_status_from_confidence() {
        assert_eq!(HypothesisStatus::from_confidence(0.9), HypothesisStatus::Supported);
        assert_eq!(HypothesisStatus::from_confidence(0.5), HypothesisStatus::Uncertain);
        assert_eq!(HypothesisStatus::from_confidence(0.1), HypothesisStatus::Refuted);
    }

    #[test]
    fn test_link_requires_known_evidence() {
        let mut ledger = Ledger::default();
        let a = ledger.add_evidence(Evidence::new(EvidenceKind::Entity, 1, "a"));
        let b = ledger.add_evidence(Evidence::new(EvidenceKind::Validation, 3, "b"));

        assert!(ledger
            .link(CrossReferenceKind::Contradicts, &a, &b, "timeline mismatch", 0.7)
            .is_some());
        assert!(ledger
            .link(CrossReferenceKind::Supports, &a, "nope", "", 0.5)
            .is_none());
        assert_eq!(ledger.cross_references().len(), 1);
        assert_eq!(ledger.cross_references()[0].kind, CrossReferenceKind::Contradicts);
    }
}
