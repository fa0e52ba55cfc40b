//! Error taxonomy for the validation core.
//!
//! Everything above the core sees only a `Decision`; these errors stay
//! internal to the pipeline and the store glue. Messages must never embed
//! the offending literals, so every variant carries codes and counts, not
//! content.

use serde::{Deserialize, Serialize};

/// Why the accept-gate refused an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsReason {
    /// Input exceeds `max_input_bytes`.
    TooLarge,
    /// Structured walk depth exceeds `max_depth`.
    DepthExceeded,
    /// Text contains NUL or other disallowed control bytes.
    InvalidEncoding,
    /// Empty input has no defined score.
    Empty,
}

impl BoundsReason {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            BoundsReason::TooLarge => ReasonCode::InputTooLarge,
            BoundsReason::DepthExceeded => ReasonCode::DepthExceeded,
            BoundsReason::InvalidEncoding => ReasonCode::InvalidEncoding,
            BoundsReason::Empty => ReasonCode::EmptyInput,
        }
    }
}

/// Stable reason identifiers carried on decisions, quarantine entries,
/// audit records, and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReasonCode {
    /// Composite score below the quarantine threshold.
    LowScore,
    /// Score landed in the quarantine band.
    SuspectScore,
    /// Fixed point not reached within the pass budget.
    ResidualReference,
    /// Pattern-cleanliness hard gate failed.
    HardGate,
    InputTooLarge,
    DepthExceeded,
    InvalidEncoding,
    EmptyInput,
    /// Transient infrastructure retries exhausted.
    InfraExhausted,
    Cancelled,
    /// Internal invariant breach (placeholder without mapping, or
    /// inconsistent placeholder reuse).
    InvariantBreach,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::LowScore => "low_score",
            ReasonCode::SuspectScore => "suspect_score",
            ReasonCode::ResidualReference => "residual_reference",
            ReasonCode::HardGate => "hard_gate",
            ReasonCode::InputTooLarge => "input_too_large",
            ReasonCode::DepthExceeded => "depth_exceeded",
            ReasonCode::InvalidEncoding => "invalid_encoding",
            ReasonCode::EmptyInput => "empty_input",
            ReasonCode::InfraExhausted => "infra_exhausted",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::InvariantBreach => "invariant_breach",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures inside the validation core.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    /// Size, depth, or encoding violation at the accept-gate.
    #[error("input bounds violation: {reason:?}")]
    InputBounds { reason: BoundsReason },

    /// The abstraction engine could not reach a fixed point.
    #[error("residual concrete reference after {passes} passes")]
    ResidualConcreteReference { passes: u32 },

    /// Hard-gate failure from the scorer.
    #[error("policy violation: {reasons:?}")]
    PolicyViolation { reasons: Vec<ReasonCode> },

    /// Store unavailable or a stage deadline was exceeded. Retried.
    #[error("transient infrastructure failure: {detail}")]
    TransientInfra { detail: String },

    /// Internal bug. Fatal for the artifact, never for the process.
    #[error("invariant breach: {detail}")]
    InvariantBreach { detail: String },

    /// Cooperative cancellation at a stage boundary.
    #[error("validation cancelled")]
    Cancelled,
}

impl SafetyError {
    /// Whether the retry loop may re-run the validation.
    pub fn is_transient(&self) -> bool {
        matches!(self, SafetyError::TransientInfra { .. })
    }

    /// Reason codes surfaced on the resulting rejection.
    pub fn reason_codes(&self) -> Vec<ReasonCode> {
        match self {
            SafetyError::InputBounds { reason } => vec![reason.reason_code()],
            SafetyError::ResidualConcreteReference { .. } => vec![ReasonCode::ResidualReference],
            SafetyError::PolicyViolation { reasons } => reasons.clone(),
            SafetyError::TransientInfra { .. } => vec![ReasonCode::InfraExhausted],
            SafetyError::InvariantBreach { .. } => vec![ReasonCode::InvariantBreach],
            SafetyError::Cancelled => vec![ReasonCode::Cancelled],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(
            SafetyError::TransientInfra {
                detail: "stage deadline".into()
            }
            .is_transient()
        );
        assert!(!SafetyError::Cancelled.is_transient());
        assert!(
            !SafetyError::InputBounds {
                reason: BoundsReason::TooLarge
            }
            .is_transient()
        );
    }

    #[test]
    fn reason_codes_are_stable_tokens() {
        assert_eq!(ReasonCode::ResidualReference.as_str(), "residual_reference");
        assert_eq!(
            serde_json::to_string(&ReasonCode::HardGate).unwrap(),
            "\"hard_gate\""
        );
    }

    #[test]
    fn bounds_map_to_reasons() {
        assert_eq!(
            BoundsReason::Empty.reason_code(),
            ReasonCode::EmptyInput
        );
        assert_eq!(
            SafetyError::ResidualConcreteReference { passes: 3 }.reason_codes(),
            vec![ReasonCode::ResidualReference]
        );
    }
}
