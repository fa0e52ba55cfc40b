//! SQLite reference implementation of the store contract.
//!
//! Defense in depth is wired into the schema itself: a trigger aborts any
//! insert or update whose score sits below the accept threshold, the audit
//! log refuses updates and deletes, and the mapping region lives in an
//! attached database file with its own ownership. Raw SQL against the
//! database hits the same walls the API does.

use crate::audit::AuditRecord;
use crate::{MappingAccess, SafetyStore, StoreError, StoreEvent};
use chrono::{DateTime, Utc};
use refseal_common::{
    Abstraction, ArtifactId, ConcreteMapping, Content, MappingEntry, Policy, QuarantineEntry,
    ReferenceKind, ReviewerStatus, ValidationStatus,
};
use refseal_engine::{RuleRegistry, flatten_leaves};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Marker the score-gate trigger aborts with; surfaced as
/// [`StoreError::ScoreBelowThreshold`].
const SCORE_GATE_TAG: &str = "REFSEAL_SCORE_GATE";
/// Marker the audit-immutability triggers abort with.
const AUDIT_IMMUTABLE_TAG: &str = "REFSEAL_AUDIT_IMMUTABLE";

/// SQLite-backed safety store. One connection behind a mutex; WAL mode for
/// concurrent readers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    registry: Arc<RuleRegistry>,
    policy: Policy,
    subscribers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
}

impl SqliteStore {
    /// Open (or create) a store. The mapping region is a separate database
    /// file so its filesystem ownership can be stricter than the
    /// abstraction region's.
    pub fn open(
        path: &Path,
        mapping_path: &Path,
        registry: Arc<RuleRegistry>,
        policy: Policy,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute(
            "ATTACH DATABASE ?1 AS mapping_region",
            params![mapping_path.to_string_lossy().into_owned()],
        )?;
        Self::with_connection(conn, registry, policy)
    }

    /// In-memory store for tests; the mapping region is a second in-memory
    /// database, keeping the regions logically separate.
    pub fn in_memory(registry: Arc<RuleRegistry>, policy: Policy) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute("ATTACH DATABASE ':memory:' AS mapping_region", [])?;
        Self::with_connection(conn, registry, policy)
    }

    fn with_connection(
        conn: Connection,
        registry: Arc<RuleRegistry>,
        policy: Policy,
    ) -> Result<Self, StoreError> {
        let schema = format!(
            r#"
            CREATE TABLE IF NOT EXISTS abstractions (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                kind_histogram TEXT NOT NULL,
                safety_score REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TRIGGER IF NOT EXISTS abstractions_score_gate_insert
            BEFORE INSERT ON abstractions
            WHEN NEW.safety_score < {threshold}
            BEGIN
                SELECT RAISE(ABORT, '{score_tag}');
            END;

            CREATE TRIGGER IF NOT EXISTS abstractions_score_gate_update
            BEFORE UPDATE ON abstractions
            WHEN NEW.safety_score < {threshold}
            BEGIN
                SELECT RAISE(ABORT, '{score_tag}');
            END;

            CREATE TABLE IF NOT EXISTS quarantine (
                id TEXT PRIMARY KEY,
                original_hash TEXT NOT NULL,
                reason_code TEXT NOT NULL,
                detected_kinds TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                reviewer_status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                artifact_id TEXT,
                decision TEXT NOT NULL,
                reasons TEXT NOT NULL,
                input_hash TEXT NOT NULL,
                breakdown TEXT,
                infra_failure INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TRIGGER IF NOT EXISTS audit_log_no_update
            BEFORE UPDATE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, '{audit_tag}');
            END;

            CREATE TRIGGER IF NOT EXISTS audit_log_no_delete
            BEFORE DELETE ON audit_log
            BEGIN
                SELECT RAISE(ABORT, '{audit_tag}');
            END;

            CREATE TABLE IF NOT EXISTS mapping_region.mappings (
                artifact_id TEXT NOT NULL,
                token TEXT NOT NULL,
                literal TEXT NOT NULL,
                kind TEXT NOT NULL,
                leaf_path TEXT NOT NULL,
                PRIMARY KEY (artifact_id, token, leaf_path)
            );
            "#,
            threshold = policy.threshold_accept,
            score_tag = SCORE_GATE_TAG,
            audit_tag = AUDIT_IMMUTABLE_TAG,
        );
        conn.execute_batch(&schema)?;
        Ok(Self {
            conn: Mutex::new(conn),
            registry,
            policy,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    fn emit(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// The store does not trust the caller; rescan at the boundary.
    fn boundary_rescan(&self, content: &Content) -> Result<(), StoreError> {
        let flat = flatten_leaves(content);
        for rule in self.registry.enabled_for(&self.policy) {
            if rule.find(&flat, 0).is_some() {
                return Err(StoreError::ResidualReference);
            }
        }
        Ok(())
    }
}

fn map_sqlite(err: rusqlite::Error) -> StoreError {
    let message = err.to_string();
    if message.contains(SCORE_GATE_TAG) {
        StoreError::ScoreBelowThreshold
    } else if message.contains(AUDIT_IMMUTABLE_TAG) {
        StoreError::AuditImmutable
    } else {
        StoreError::Backend(err)
    }
}

fn insert_audit(conn: &Connection, audit: &AuditRecord) -> Result<(), StoreError> {
    let reasons = serde_json::to_string(&audit.reasons)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let breakdown = audit
        .breakdown
        .map(|b| serde_json::to_string(&b))
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    conn.execute(
        "INSERT INTO audit_log (id, artifact_id, decision, reasons, input_hash, breakdown, infra_failure, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            audit.id.to_string(),
            audit.artifact_id.map(|id| id.to_string()),
            audit.decision.as_str(),
            reasons,
            audit.input_hash,
            breakdown,
            audit.infra_failure,
            audit.created_at.to_rfc3339(),
        ],
    )
    .map_err(map_sqlite)?;
    Ok(())
}

fn parse_status(s: &str) -> Result<ValidationStatus, StoreError> {
    match s {
        "pending" => Ok(ValidationStatus::Pending),
        "validated" => Ok(ValidationStatus::Validated),
        "quarantined" => Ok(ValidationStatus::Quarantined),
        "rejected" => Ok(ValidationStatus::Rejected),
        other => Err(StoreError::Corrupt(format!("unknown status {other}"))),
    }
}

fn parse_reviewer_status(s: &str) -> Result<ReviewerStatus, StoreError> {
    match s {
        "pending_review" => Ok(ReviewerStatus::PendingReview),
        "released" => Ok(ReviewerStatus::Released),
        "purged" => Ok(ReviewerStatus::Purged),
        other => Err(StoreError::Corrupt(format!("unknown reviewer status {other}"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp: {e}")))
}

impl SafetyStore for SqliteStore {
    fn insert_validated(
        &self,
        artifact: &Abstraction,
        mapping: &ConcreteMapping,
        audit: &AuditRecord,
    ) -> Result<(), StoreError> {
        if artifact.validation_status != ValidationStatus::Validated {
            return Err(StoreError::InvalidTransition {
                from: artifact.validation_status,
                to: ValidationStatus::Validated,
            });
        }
        // Score gate at the API layer; the trigger repeats it at the SQL layer.
        if artifact.safety_score < self.policy.threshold_accept {
            return Err(StoreError::ScoreBelowThreshold);
        }
        self.boundary_rescan(&artifact.abstracted_content)?;

        let content = serde_json::to_string(&artifact.abstracted_content)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let histogram = serde_json::to_string(&artifact.kind_histogram)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(map_sqlite)?;
        tx.execute(
            "INSERT INTO abstractions (id, content, kind_histogram, safety_score, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                artifact.id.to_string(),
                content,
                histogram,
                artifact.safety_score,
                artifact.validation_status.as_str(),
                now,
                now,
            ],
        )
        .map_err(map_sqlite)?;
        for entry in &mapping.entries {
            tx.execute(
                "INSERT INTO mapping_region.mappings (artifact_id, token, literal, kind, leaf_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    artifact.id.to_string(),
                    entry.token,
                    entry.literal,
                    entry.kind.as_str(),
                    entry.path,
                ],
            )
            .map_err(map_sqlite)?;
        }
        insert_audit(&tx, audit)?;
        tx.commit().map_err(map_sqlite)?;
        drop(conn);

        debug!(id = %artifact.id, "artifact persisted");
        self.emit(StoreEvent::Accepted { id: artifact.id });
        Ok(())
    }

    fn insert_quarantine(
        &self,
        entry: &QuarantineEntry,
        audit: &AuditRecord,
    ) -> Result<(), StoreError> {
        let reason = serde_json::to_string(&entry.reason_code)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let kinds = serde_json::to_string(&entry.detected_kinds)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(map_sqlite)?;
        tx.execute(
            "INSERT INTO quarantine (id, original_hash, reason_code, detected_kinds, first_seen_at, reviewer_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.original_hash,
                reason,
                kinds,
                entry.first_seen_at.to_rfc3339(),
                entry.reviewer_status.as_str(),
            ],
        )
        .map_err(map_sqlite)?;
        insert_audit(&tx, audit)?;
        tx.commit().map_err(map_sqlite)?;
        drop(conn);

        self.emit(StoreEvent::Quarantined { id: entry.id });
        Ok(())
    }

    fn record_rejection(&self, audit: &AuditRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        insert_audit(&conn, audit)
    }

    fn read_abstraction(&self, id: &ArtifactId) -> Result<Abstraction, StoreError> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT content, kind_histogram, safety_score, status, created_at, updated_at
                 FROM abstractions WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => map_sqlite(other),
            })?;

        let (content, histogram, score, status, created_at, updated_at) = row;
        Ok(Abstraction {
            id: *id,
            abstracted_content: serde_json::from_str::<Content>(&content)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            kind_histogram: serde_json::from_str::<BTreeMap<ReferenceKind, u64>>(&histogram)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            safety_score: score,
            validation_status: parse_status(&status)?,
            created_at: Some(parse_timestamp(&created_at)?),
            updated_at: Some(parse_timestamp(&updated_at)?),
        })
    }

    fn read_mapping(
        &self,
        id: &ArtifactId,
        _access: MappingAccess,
    ) -> Result<ConcreteMapping, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT token, literal, kind, leaf_path FROM mapping_region.mappings
                 WHERE artifact_id = ?1 ORDER BY rowid",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(map_sqlite)?;

        let mut entries = Vec::new();
        for row in rows {
            let (token, literal, kind, path) = row.map_err(map_sqlite)?;
            entries.push(MappingEntry {
                token,
                literal,
                kind: ReferenceKind::from_str(&kind)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                path,
            });
        }
        if entries.is_empty() {
            // Distinguish "no mapping rows" from "no such artifact".
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM abstractions WHERE id = ?1)",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .map_err(map_sqlite)?;
            if !exists {
                return Err(StoreError::NotFound);
            }
        }
        Ok(ConcreteMapping { entries })
    }

    fn update_status(&self, id: &ArtifactId, next: ValidationStatus) -> Result<(), StoreError> {
        let current = self.read_abstraction(id)?.validation_status;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE abstractions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![next.as_str(), Utc::now().to_rfc3339(), id.to_string()],
        )
        .map_err(map_sqlite)?;
        drop(conn);

        self.emit(StoreEvent::StatusChanged {
            id: *id,
            from: current,
            to: next,
        });
        Ok(())
    }

    fn list_quarantine(&self) -> Result<Vec<QuarantineEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, original_hash, reason_code, detected_kinds, first_seen_at, reviewer_status
                 FROM quarantine ORDER BY first_seen_at",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(map_sqlite)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, hash, reason, kinds, seen, reviewer) = row.map_err(map_sqlite)?;
            entries.push(QuarantineEntry {
                id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?,
                original_hash: hash,
                reason_code: serde_json::from_str(&reason)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                detected_kinds: serde_json::from_str(&kinds)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                first_seen_at: parse_timestamp(&seen)?,
                reviewer_status: parse_reviewer_status(&reviewer)?,
            });
        }
        Ok(entries)
    }

    fn resolve_quarantine(&self, id: &Uuid, status: ReviewerStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE quarantine SET reviewer_status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )
            .map_err(map_sqlite)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn evict_quarantine(&self, older_than: chrono::Duration) -> Result<u64, StoreError> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let evicted = conn
            .execute(
                "DELETE FROM quarantine
                 WHERE first_seen_at < ?1 AND reviewer_status != 'pending_review'",
                params![cutoff],
            )
            .map_err(map_sqlite)? as u64;
        drop(conn);

        if evicted > 0 {
            self.emit(StoreEvent::QuarantineEvicted { count: evicted });
        }
        Ok(evicted)
    }

    fn subscribe(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}
