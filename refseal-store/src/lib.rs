//! Safety-enforcing store contract for Refseal.
//!
//! The store is the last line of defense: even a caller that bypasses the
//! validation pipeline cannot persist unsafe content, because the backing
//! engine re-checks the score gate and rescans content at its own
//! boundary. The mapping region lives apart from the abstraction region
//! and is only reachable through an explicit privileged capability.

pub mod audit;
pub mod persist;
pub mod sqlite;

pub use audit::{AuditDecision, AuditRecord};
pub use persist::validate_and_persist;
pub use sqlite::SqliteStore;

use refseal_common::{
    Abstraction, ArtifactId, ConcreteMapping, QuarantineEntry, ReviewerStatus, ValidationStatus,
};
use refseal_engine::RetryableError;
use std::sync::mpsc;
use uuid::Uuid;

/// Capability token for mapping reads. Constructing one is an explicit,
/// grep-able act; code without it cannot reach reversal keys.
#[derive(Debug, Clone, Copy)]
pub struct MappingAccess {
    _priv: (),
}

impl MappingAccess {
    pub fn privileged() -> Self {
        Self { _priv: () }
    }
}

/// Store failure, with a stable code per variant.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The artifact's score is below the accept threshold.
    #[error("safety score below accept threshold")]
    ScoreBelowThreshold,
    /// The store-boundary rescan found a live reference.
    #[error("content failed store-side rescan")]
    ResidualReference,
    #[error("artifact not found")]
    NotFound,
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ValidationStatus,
        to: ValidationStatus,
    },
    /// The audit log is append-only.
    #[error("audit log is append-only")]
    AuditImmutable,
    /// A stored row failed to parse back into the data model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store backend failure: {0}")]
    Backend(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::ScoreBelowThreshold => "score_below_threshold",
            StoreError::ResidualReference => "residual_reference",
            StoreError::NotFound => "not_found",
            StoreError::InvalidTransition { .. } => "invalid_transition",
            StoreError::AuditImmutable => "audit_immutable",
            StoreError::Corrupt(_) => "corrupt",
            StoreError::Backend(_) => "backend",
        }
    }
}

impl RetryableError for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

/// Event emitted on persisted state transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Accepted {
        id: ArtifactId,
    },
    StatusChanged {
        id: ArtifactId,
        from: ValidationStatus,
        to: ValidationStatus,
    },
    Quarantined {
        id: Uuid,
    },
    QuarantineEvicted {
        count: u64,
    },
}

/// The contract a conforming persistence layer must enforce.
pub trait SafetyStore: Send + Sync {
    /// Persist an accepted artifact, its mapping, and the audit record in
    /// one transaction. Partial persistence is forbidden.
    fn insert_validated(
        &self,
        artifact: &Abstraction,
        mapping: &ConcreteMapping,
        audit: &AuditRecord,
    ) -> Result<(), StoreError>;

    /// Persist a quarantine entry plus its audit record.
    fn insert_quarantine(
        &self,
        entry: &QuarantineEntry,
        audit: &AuditRecord,
    ) -> Result<(), StoreError>;

    /// Record a rejection in the audit log.
    fn record_rejection(&self, audit: &AuditRecord) -> Result<(), StoreError>;

    fn read_abstraction(&self, id: &ArtifactId) -> Result<Abstraction, StoreError>;

    /// Read the reversal mapping. Privileged.
    fn read_mapping(
        &self,
        id: &ArtifactId,
        access: MappingAccess,
    ) -> Result<ConcreteMapping, StoreError>;

    /// Apply a status transition, enforcing the lifecycle state machine.
    fn update_status(&self, id: &ArtifactId, next: ValidationStatus) -> Result<(), StoreError>;

    fn list_quarantine(&self) -> Result<Vec<QuarantineEntry>, StoreError>;

    /// Reviewer resolution of a quarantine entry.
    fn resolve_quarantine(&self, id: &Uuid, status: ReviewerStatus) -> Result<(), StoreError>;

    /// Drop resolved quarantine entries older than the cutoff. Returns the
    /// number evicted.
    fn evict_quarantine(&self, older_than: chrono::Duration) -> Result<u64, StoreError>;

    /// Subscribe to state-transition events.
    fn subscribe(&self) -> mpsc::Receiver<StoreEvent>;
}
