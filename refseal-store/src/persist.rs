//! Glue between the validation pipeline and the store contract.
//!
//! On accept, the artifact, mapping, and audit record are written in one
//! transaction, with transient backend failures retried under the policy's
//! backoff budget. A persistence failure converts the accept into a
//! rejection: the caller never sees an accept that did not durably land.

use crate::audit::AuditRecord;
use crate::{SafetyStore, StoreError};
use refseal_common::{Content, Decision, ReasonCode, salted_hash};
use refseal_engine::{RetryPolicy, ValidationPipeline, flatten_leaves, run_with_retry};
use tracing::warn;

/// Validate `input` and persist the outcome through `store`.
pub fn validate_and_persist(
    pipeline: &ValidationPipeline,
    store: &dyn SafetyStore,
    input: &Content,
) -> Decision {
    let decision = pipeline.validate(input);
    let policy = pipeline.policy();
    let input_hash = salted_hash(&policy.hash_salt, flatten_leaves(input).as_bytes());
    let retry = RetryPolicy::from_policy(policy);

    match decision {
        Decision::Accept {
            artifact,
            mapping,
            report,
        } => {
            let audit = AuditRecord::accepted(artifact.id, input_hash.clone(), report.breakdown);
            let persisted = run_with_retry("store_insert", &retry, || {
                store.insert_validated(&artifact, &mapping, &audit)
            });
            match persisted {
                Ok(()) => Decision::Accept {
                    artifact,
                    mapping,
                    report,
                },
                Err(err) => {
                    // Fail closed: an accept that cannot be persisted is a
                    // rejection, audited as infra when the store (rather
                    // than the content) was the problem.
                    warn!(code = err.code(), "persisting accepted artifact failed");
                    let (reason, infra) = match err {
                        StoreError::Backend(_) => (ReasonCode::InfraExhausted, true),
                        StoreError::ScoreBelowThreshold | StoreError::ResidualReference => {
                            (ReasonCode::InvariantBreach, false)
                        }
                        _ => (ReasonCode::InfraExhausted, true),
                    };
                    let reject_audit =
                        AuditRecord::rejected(vec![reason], input_hash, infra);
                    if let Err(audit_err) = store.record_rejection(&reject_audit) {
                        warn!(code = audit_err.code(), "rejection audit also failed");
                    }
                    Decision::Reject {
                        reasons: vec![reason],
                    }
                }
            }
        }
        Decision::Quarantine { entry, reasons } => {
            let audit = AuditRecord::quarantined(reasons.clone(), input_hash, None);
            let persisted = run_with_retry("store_quarantine", &retry, || {
                store.insert_quarantine(&entry, &audit)
            });
            if let Err(err) = persisted {
                warn!(code = err.code(), "persisting quarantine entry failed");
            }
            Decision::Quarantine { entry, reasons }
        }
        Decision::Reject { reasons } => {
            let infra = reasons.contains(&ReasonCode::InfraExhausted);
            let audit = AuditRecord::rejected(reasons.clone(), input_hash, infra);
            if let Err(err) = store.record_rejection(&audit) {
                warn!(code = err.code(), "rejection audit failed");
            }
            Decision::Reject { reasons }
        }
    }
}
