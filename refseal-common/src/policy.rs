//! Policy: the configuration surface of the validation core.
//!
//! Defaults match the documented thresholds (accept 0.80, quarantine 0.60).
//! Every field is overridable from TOML; `validate` reports anything
//! suspicious before the policy is put in front of traffic.

use crate::kinds::ReferenceKind;
use serde::{Deserialize, Serialize};

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Weights of the six scoring dimensions. Must sum to 1 within epsilon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionWeights {
    #[serde(default = "default_w_coverage")]
    pub coverage: f64,
    #[serde(default = "default_w_consistency")]
    pub consistency: f64,
    #[serde(default = "default_w_density")]
    pub density: f64,
    #[serde(default = "default_w_entropy")]
    pub entropy_residue: f64,
    #[serde(default = "default_w_pattern")]
    pub pattern_cleanliness: f64,
    #[serde(default = "default_w_context")]
    pub context_cleanliness: f64,
}

fn default_w_coverage() -> f64 {
    0.30
}
fn default_w_consistency() -> f64 {
    0.15
}
fn default_w_density() -> f64 {
    0.10
}
fn default_w_entropy() -> f64 {
    0.15
}
fn default_w_pattern() -> f64 {
    0.20
}
fn default_w_context() -> f64 {
    0.10
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            coverage: default_w_coverage(),
            consistency: default_w_consistency(),
            density: default_w_density(),
            entropy_residue: default_w_entropy(),
            pattern_cleanliness: default_w_pattern(),
            context_cleanliness: default_w_context(),
        }
    }
}

impl DimensionWeights {
    pub fn sum(&self) -> f64 {
        self.coverage
            + self.consistency
            + self.density
            + self.entropy_residue
            + self.pattern_cleanliness
            + self.context_cleanliness
    }
}

/// Per-stage deadlines in milliseconds, checked at stage boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeoutsMs {
    #[serde(default = "default_stage_ms")]
    pub accept_gate: u64,
    #[serde(default = "default_stage_ms")]
    pub abstraction: u64,
    #[serde(default = "default_stage_ms")]
    pub validation: u64,
    #[serde(default = "default_stage_ms")]
    pub scoring: u64,
    #[serde(default = "default_decide_ms")]
    pub decision: u64,
}

fn default_stage_ms() -> u64 {
    50
}
fn default_decide_ms() -> u64 {
    5
}

impl Default for StageTimeoutsMs {
    fn default() -> Self {
        Self {
            accept_gate: default_stage_ms(),
            abstraction: default_stage_ms(),
            validation: default_stage_ms(),
            scoring: default_stage_ms(),
            decision: default_decide_ms(),
        }
    }
}

/// The validation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Minimum score to accept.
    #[serde(default = "default_threshold_accept")]
    pub threshold_accept: f64,
    /// Lower bound of the quarantine band.
    #[serde(default = "default_threshold_quarantine")]
    pub threshold_quarantine: f64,
    /// Hard size cap per input, in bytes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    /// Maximum structural walk depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Abstraction fixed-point iteration cap.
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
    /// Placeholder rendering template; `{kind}` is substituted.
    #[serde(default = "default_placeholder_syntax")]
    pub placeholder_syntax: String,
    /// Kinds the detectors run for. Defaults to all.
    #[serde(default = "default_enabled_kinds")]
    pub enabled_kinds: Vec<ReferenceKind>,
    /// Derive short stable name tags from a salted hash of each literal.
    #[serde(default)]
    pub named_placeholders: bool,
    /// Exempt template artifacts from the dangling-placeholder check.
    #[serde(default)]
    pub allow_dangling_placeholders: bool,
    #[serde(default)]
    pub dimension_weights: DimensionWeights,
    #[serde(default)]
    pub stage_timeouts_ms: StageTimeoutsMs,
    /// Transient-error retry budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) applied to retry delays.
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
    /// Salt for quarantine/audit hashes and named placeholder tags.
    #[serde(default = "default_hash_salt")]
    pub hash_salt: String,
}

fn default_threshold_accept() -> f64 {
    0.80
}
fn default_threshold_quarantine() -> f64 {
    0.60
}
fn default_max_input_bytes() -> usize {
    1024 * 1024
}
fn default_max_depth() -> usize {
    32
}
fn default_max_passes() -> u32 {
    3
}
fn default_placeholder_syntax() -> String {
    "<{kind}>".to_string()
}
fn default_enabled_kinds() -> Vec<ReferenceKind> {
    ReferenceKind::ALL.to_vec()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    25
}
fn default_retry_max_delay_ms() -> u64 {
    250
}
fn default_retry_jitter() -> f64 {
    0.2
}
fn default_hash_salt() -> String {
    "refseal-v1".to_string()
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            threshold_accept: default_threshold_accept(),
            threshold_quarantine: default_threshold_quarantine(),
            max_input_bytes: default_max_input_bytes(),
            max_depth: default_max_depth(),
            max_passes: default_max_passes(),
            placeholder_syntax: default_placeholder_syntax(),
            enabled_kinds: default_enabled_kinds(),
            named_placeholders: false,
            allow_dangling_placeholders: false,
            dimension_weights: DimensionWeights::default(),
            stage_timeouts_ms: StageTimeoutsMs::default(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: default_retry_jitter(),
            hash_salt: default_hash_salt(),
        }
    }
}

/// A problem found while validating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyWarning {
    pub field: &'static str,
    pub message: String,
}

/// Policy load failure.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid policy: {0}")]
    Invalid(String),
}

impl Policy {
    /// Parse a policy from TOML, applying defaults for absent fields.
    /// Fails if the parsed policy does not validate cleanly.
    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyError> {
        let policy: Policy = toml::from_str(raw)?;
        let warnings = policy.validate();
        if let Some(w) = warnings.first() {
            return Err(PolicyError::Invalid(format!("{}: {}", w.field, w.message)));
        }
        Ok(policy)
    }

    pub fn is_enabled(&self, kind: ReferenceKind) -> bool {
        self.enabled_kinds.contains(&kind)
    }

    /// Check internal consistency. Empty result means the policy is usable.
    pub fn validate(&self) -> Vec<PolicyWarning> {
        let mut warnings = Vec::new();

        if !(0.0..=1.0).contains(&self.threshold_accept) {
            warnings.push(PolicyWarning {
                field: "threshold_accept",
                message: format!("must be in [0, 1], got {}", self.threshold_accept),
            });
        }
        if self.threshold_quarantine > self.threshold_accept {
            warnings.push(PolicyWarning {
                field: "threshold_quarantine",
                message: format!(
                    "quarantine bound {} exceeds accept threshold {}",
                    self.threshold_quarantine, self.threshold_accept
                ),
            });
        }
        let weight_sum = self.dimension_weights.sum();
        if (weight_sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            warnings.push(PolicyWarning {
                field: "dimension_weights",
                message: format!("weights must sum to 1, got {weight_sum}"),
            });
        }
        if self.max_input_bytes == 0 {
            warnings.push(PolicyWarning {
                field: "max_input_bytes",
                message: "must be non-zero".into(),
            });
        }
        if self.max_depth == 0 {
            warnings.push(PolicyWarning {
                field: "max_depth",
                message: "must be non-zero".into(),
            });
        }
        if self.max_passes == 0 {
            warnings.push(PolicyWarning {
                field: "max_passes",
                message: "must be non-zero".into(),
            });
        }
        if self.enabled_kinds.is_empty() {
            warnings.push(PolicyWarning {
                field: "enabled_kinds",
                message: "at least one kind must be enabled".into(),
            });
        }
        if !self.placeholder_syntax.contains("{kind}") {
            warnings.push(PolicyWarning {
                field: "placeholder_syntax",
                message: "template must contain {kind}".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            warnings.push(PolicyWarning {
                field: "retry_jitter",
                message: format!("must be in [0, 1], got {}", self.retry_jitter),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        let policy = Policy::default();
        assert!(policy.validate().is_empty());
        assert_eq!(policy.threshold_accept, 0.80);
        assert_eq!(policy.threshold_quarantine, 0.60);
        assert_eq!(policy.max_input_bytes, 1024 * 1024);
        assert_eq!(policy.enabled_kinds.len(), ReferenceKind::ALL.len());
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((DimensionWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn toml_overrides_apply() {
        let policy = Policy::from_toml_str(
            r#"
            threshold_accept = 0.9
            threshold_quarantine = 0.5
            enabled_kinds = ["file_path", "token"]
            "#,
        )
        .unwrap();
        assert_eq!(policy.threshold_accept, 0.9);
        assert!(policy.is_enabled(ReferenceKind::Token));
        assert!(!policy.is_enabled(ReferenceKind::Email));
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let err = Policy::from_toml_str(
            r#"
            threshold_accept = 0.5
            threshold_quarantine = 0.7
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }

    #[test]
    fn weight_drift_is_flagged() {
        let mut policy = Policy::default();
        policy.dimension_weights.coverage = 0.5;
        let warnings = policy.validate();
        assert!(warnings.iter().any(|w| w.field == "dimension_weights"));
    }

    #[test]
    fn placeholder_syntax_must_keep_kind_slot() {
        let mut policy = Policy::default();
        policy.placeholder_syntax = "<redacted>".into();
        assert!(
            policy
                .validate()
                .iter()
                .any(|w| w.field == "placeholder_syntax")
        );
    }
}
