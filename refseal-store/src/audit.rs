//! Append-only audit records.
//!
//! Every accept, quarantine, and reject leaves a record carrying a salted
//! hash of the original input (never the input itself) and the
//! per-dimension score breakdown.

use chrono::{DateTime, Utc};
use refseal_common::{ArtifactId, DimensionScores, ReasonCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome recorded by an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Accepted,
    Quarantined,
    Rejected,
}

impl AuditDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditDecision::Accepted => "accepted",
            AuditDecision::Quarantined => "quarantined",
            AuditDecision::Rejected => "rejected",
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub artifact_id: Option<ArtifactId>,
    pub decision: AuditDecision,
    pub reasons: Vec<ReasonCode>,
    /// Salted hash of the original input.
    pub input_hash: String,
    pub breakdown: Option<DimensionScores>,
    /// True when the outcome reflects infrastructure failure, not content.
    pub infra_failure: bool,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn accepted(
        artifact_id: ArtifactId,
        input_hash: String,
        breakdown: DimensionScores,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_id: Some(artifact_id),
            decision: AuditDecision::Accepted,
            reasons: Vec::new(),
            input_hash,
            breakdown: Some(breakdown),
            infra_failure: false,
            created_at: Utc::now(),
        }
    }

    pub fn quarantined(
        reasons: Vec<ReasonCode>,
        input_hash: String,
        breakdown: Option<DimensionScores>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_id: None,
            decision: AuditDecision::Quarantined,
            reasons,
            input_hash,
            breakdown,
            infra_failure: false,
            created_at: Utc::now(),
        }
    }

    pub fn rejected(reasons: Vec<ReasonCode>, input_hash: String, infra_failure: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_id: None,
            decision: AuditDecision::Rejected,
            reasons,
            input_hash,
            breakdown: None,
            infra_failure,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_record_carries_breakdown() {
        let record = AuditRecord::accepted(
            ArtifactId::new(),
            "b3:abcd".into(),
            DimensionScores::PERFECT,
        );
        assert_eq!(record.decision, AuditDecision::Accepted);
        assert!(record.breakdown.is_some());
        assert!(!record.infra_failure);
    }

    #[test]
    fn rejected_record_flags_infra() {
        let record =
            AuditRecord::rejected(vec![ReasonCode::InfraExhausted], "b3:ffff".into(), true);
        assert!(record.infra_failure);
        assert_eq!(record.artifact_id, None);
    }

    #[test]
    fn serde_round_trip() {
        let record = AuditRecord::quarantined(
            vec![ReasonCode::SuspectScore],
            "b3:1234".into(),
            None,
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
