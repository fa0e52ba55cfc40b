//! Artifact data model shared by the engine and the store.

use crate::errors::ReasonCode;
use crate::kinds::ReferenceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a persisted abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open byte range inside one string leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A candidate concrete reference emitted by the extractor.
///
/// Lives for one scan pass: produced by the extractor, consumed by the
/// placeholder generator, then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: ReferenceKind,
    /// Span within the raw (undecoded) leaf.
    pub span: Span,
    /// The raw substring the span covers.
    pub literal: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    /// Rule label driving placeholder naming (e.g. `api_key` vs `token`).
    pub label: &'static str,
    /// Logical path of the leaf the candidate was found in (empty for text).
    pub path: String,
}

/// A typed placeholder replacing one distinct concrete literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placeholder {
    pub kind: ReferenceKind,
    /// Base name, normally the rule label (`file_path`, `api_key`, ...).
    pub name: String,
    /// 1-based index among distinct literals sharing this name.
    pub occurrence_index: u32,
}

impl Placeholder {
    /// Render using the policy placeholder syntax (`<{kind}>` by default).
    ///
    /// The first distinct literal renders as `<name>`, later distinct
    /// literals as `<name_2>`, `<name_3>`, and so on.
    pub fn render(&self, syntax: &str) -> String {
        let core = if self.occurrence_index <= 1 {
            self.name.clone()
        } else {
            format!("{}_{}", self.name, self.occurrence_index)
        };
        syntax.replace("{kind}", &core)
    }
}

/// Content flowing through the pipeline: plain text or a structured value
/// whose string leaves are scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(serde_json::Value),
}

impl Content {
    /// Approximate size in bytes, used for the input-size gate.
    pub fn approx_bytes(&self) -> usize {
        match self {
            Content::Text(s) => s.len(),
            // Serialization cannot fail for a Value already in memory.
            Content::Structured(v) => v.to_string().len(),
        }
    }

    /// Maximum nesting depth of the structured form (text is depth 1).
    pub fn depth(&self) -> usize {
        fn value_depth(v: &serde_json::Value) -> usize {
            match v {
                serde_json::Value::Array(items) => {
                    1 + items.iter().map(value_depth).max().unwrap_or(0)
                }
                serde_json::Value::Object(map) => {
                    1 + map.values().map(value_depth).max().unwrap_or(0)
                }
                _ => 1,
            }
        }
        match self {
            Content::Text(_) => 1,
            Content::Structured(v) => value_depth(v),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Structured(v) => v.is_null(),
        }
    }
}

/// One `placeholder token -> raw literal` association, addressed by leaf path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// The rendered placeholder token as it appears in the content.
    pub token: String,
    /// The raw concrete literal that was replaced.
    pub literal: String,
    pub kind: ReferenceKind,
    /// Logical path of the leaf the replacement happened in.
    pub path: String,
}

/// Ordered reversal key for one artifact.
///
/// Stored in a logical region stricter than the artifact itself; the
/// artifact never embeds it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcreteMapping {
    pub entries: Vec<MappingEntry>,
}

impl ConcreteMapping {
    pub fn get(&self, token: &str) -> Option<&MappingEntry> {
        self.entries.iter().find(|e| e.token == token)
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.get(token).is_some()
    }

    /// Drop every entry for `token`. Used by reviewers to revoke a single
    /// literal without touching the artifact.
    pub fn remove(&mut self, token: &str) {
        self.entries.retain(|e| e.token != token);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validation lifecycle of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Quarantined,
    Rejected,
}

impl ValidationStatus {
    /// The forward-only state machine: pending reaches any terminal,
    /// quarantine resolves to validated after review, and validated may be
    /// re-quarantined when policy changes. Everything else is forbidden.
    pub fn can_transition_to(&self, next: ValidationStatus) -> bool {
        use ValidationStatus::*;
        matches!(
            (self, next),
            (Pending, Validated)
                | (Pending, Quarantined)
                | (Pending, Rejected)
                | (Quarantined, Validated)
                | (Validated, Quarantined)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Pending => "pending",
            ValidationStatus::Validated => "validated",
            ValidationStatus::Quarantined => "quarantined",
            ValidationStatus::Rejected => "rejected",
        }
    }
}

/// The persisted artifact: placeholder-dense content plus its score.
///
/// `created_at`/`updated_at` are `None` until the store assigns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abstraction {
    pub id: ArtifactId,
    pub abstracted_content: Content,
    pub kind_histogram: BTreeMap<ReferenceKind, u64>,
    pub safety_score: f64,
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Reviewer disposition of a quarantined input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerStatus {
    PendingReview,
    Released,
    Purged,
}

impl ReviewerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewerStatus::PendingReview => "pending_review",
            ReviewerStatus::Released => "released",
            ReviewerStatus::Purged => "purged",
        }
    }
}

/// Quarantine record: a salted hash and a summary, never the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub id: Uuid,
    pub original_hash: String,
    pub reason_code: ReasonCode,
    pub detected_kinds: Vec<ReferenceKind>,
    pub first_seen_at: DateTime<Utc>,
    pub reviewer_status: ReviewerStatus,
}

/// Per-dimension scorer output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub coverage: f64,
    pub consistency: f64,
    pub density: f64,
    pub entropy_residue: f64,
    pub pattern_cleanliness: f64,
    pub context_cleanliness: f64,
}

impl DimensionScores {
    pub const PERFECT: DimensionScores = DimensionScores {
        coverage: 1.0,
        consistency: 1.0,
        density: 1.0,
        entropy_residue: 1.0,
        pattern_cleanliness: 1.0,
        context_cleanliness: 1.0,
    };
}

/// Composite score with its breakdown and human-free reason codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: f64,
    pub breakdown: DimensionScores,
    pub reasons: Vec<ReasonCode>,
}

impl ScoreReport {
    pub fn hard_gate_failed(&self) -> bool {
        self.breakdown.pattern_cleanliness == 0.0
    }
}

/// Outcome of one validation, the only shape that crosses the core boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept {
        artifact: Abstraction,
        mapping: ConcreteMapping,
        report: ScoreReport,
    },
    Quarantine {
        entry: QuarantineEntry,
        reasons: Vec<ReasonCode>,
    },
    Reject {
        reasons: Vec<ReasonCode>,
    },
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept { .. })
    }

    pub fn is_quarantine(&self) -> bool {
        matches!(self, Decision::Quarantine { .. })
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Decision::Reject { .. })
    }

    pub fn reasons(&self) -> &[ReasonCode] {
        match self {
            Decision::Accept { .. } => &[],
            Decision::Quarantine { reasons, .. } | Decision::Reject { reasons } => reasons,
        }
    }
}
