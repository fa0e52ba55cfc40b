//! Abstraction engine: composes the extractor and the placeholder table
//! into the `abstract` operation, iterating to a fixed point.

use crate::extract::{Extractor, ScanStats};
use crate::placeholder::PlaceholderTable;
use crate::rules::RuleRegistry;
use refseal_common::errors::BoundsReason;
use refseal_common::{
    Candidate, ConcreteMapping, Content, MappingEntry, Policy, ReferenceKind, SafetyError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Counters describing one abstraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Scan passes performed (the final, clean pass included).
    pub passes: u32,
    /// Placeholder substitutions applied.
    pub substitutions: u64,
    pub dropped_low_confidence: u64,
    pub overlap_ties: u64,
    pub decoded_leaves: u64,
}

/// Result of `abstract`: content, reversal mapping, histogram, diagnostics.
#[derive(Debug, Clone)]
pub struct AbstractionOutcome {
    pub abstracted_content: Content,
    pub mapping: ConcreteMapping,
    pub kind_histogram: BTreeMap<ReferenceKind, u64>,
    pub diagnostics: Diagnostics,
}

/// Orchestrates extraction and replacement against a registry snapshot.
pub struct AbstractionEngine {
    registry: Arc<RuleRegistry>,
}

impl AbstractionEngine {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Abstract `input` under `policy`.
    ///
    /// Replaces spans right-to-left within each leaf so earlier offsets
    /// stay valid, then rescans until no enabled matcher fires. Fails with
    /// `ResidualConcreteReference` if the fixed point is not reached within
    /// `policy.max_passes`.
    pub fn abstract_content(
        &self,
        input: &Content,
        policy: &Policy,
    ) -> Result<AbstractionOutcome, SafetyError> {
        if input.approx_bytes() > policy.max_input_bytes {
            return Err(SafetyError::InputBounds {
                reason: BoundsReason::TooLarge,
            });
        }
        if input.depth() > policy.max_depth {
            return Err(SafetyError::InputBounds {
                reason: BoundsReason::DepthExceeded,
            });
        }

        let extractor = Extractor::new(&self.registry, policy);
        let mut content = input.clone();
        let mut table = PlaceholderTable::new(policy);
        let mut mapping = ConcreteMapping::default();
        let mut histogram: BTreeMap<ReferenceKind, u64> = BTreeMap::new();
        let mut diagnostics = Diagnostics::default();

        for pass in 1..=policy.max_passes {
            diagnostics.passes = pass;
            let substituted = pass_over(
                &extractor,
                &mut content,
                &mut table,
                &mut mapping,
                &mut histogram,
                &mut diagnostics,
            );
            if substituted == 0 {
                // Fixed point: nothing left for any enabled matcher.
                return Ok(AbstractionOutcome {
                    abstracted_content: content,
                    mapping,
                    kind_histogram: histogram,
                    diagnostics,
                });
            }
            diagnostics.substitutions += substituted;
            debug!(pass, substituted, "abstraction pass applied");
        }

        // Pass budget exhausted with the last pass still substituting.
        // One final rescan decides whether we actually converged.
        let mut residual_scan = extractor.candidates(&content);
        if residual_scan.next().is_some() {
            return Err(SafetyError::ResidualConcreteReference {
                passes: policy.max_passes,
            });
        }
        Ok(AbstractionOutcome {
            abstracted_content: content,
            mapping,
            kind_histogram: histogram,
            diagnostics,
        })
    }
}

/// One scan-and-replace sweep over every string leaf. Returns the number
/// of substitutions applied.
fn pass_over(
    extractor: &Extractor<'_>,
    content: &mut Content,
    table: &mut PlaceholderTable<'_>,
    mapping: &mut ConcreteMapping,
    histogram: &mut BTreeMap<ReferenceKind, u64>,
    diagnostics: &mut Diagnostics,
) -> u64 {
    let mut stats = ScanStats::default();
    let substituted = match content {
        Content::Text(s) => {
            let (replaced, n) = rewrite_leaf(extractor, s, "", table, mapping, histogram, &mut stats);
            if let Some(new) = replaced {
                *s = new;
            }
            n
        }
        Content::Structured(v) => {
            rewrite_value(extractor, v, "", table, mapping, histogram, &mut stats)
        }
    };
    diagnostics.dropped_low_confidence += stats.dropped_low_confidence;
    diagnostics.overlap_ties += stats.overlap_ties;
    diagnostics.decoded_leaves += stats.decoded_leaves;
    substituted
}

fn rewrite_value(
    extractor: &Extractor<'_>,
    value: &mut serde_json::Value,
    path: &str,
    table: &mut PlaceholderTable<'_>,
    mapping: &mut ConcreteMapping,
    histogram: &mut BTreeMap<ReferenceKind, u64>,
    stats: &mut ScanStats,
) -> u64 {
    match value {
        serde_json::Value::String(s) => {
            let (replaced, n) = rewrite_leaf(extractor, s, path, table, mapping, histogram, stats);
            if let Some(new) = replaced {
                *s = new;
            }
            n
        }
        serde_json::Value::Array(items) => {
            let mut n = 0;
            for (i, item) in items.iter_mut().enumerate() {
                let child = format!("{path}[{i}]");
                n += rewrite_value(extractor, item, &child, table, mapping, histogram, stats);
            }
            n
        }
        serde_json::Value::Object(map) => {
            let mut n = 0;
            for (k, item) in map.iter_mut() {
                let child = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                n += rewrite_value(extractor, item, &child, table, mapping, histogram, stats);
            }
            n
        }
        _ => 0,
    }
}

fn rewrite_leaf(
    extractor: &Extractor<'_>,
    leaf: &str,
    path: &str,
    table: &mut PlaceholderTable<'_>,
    mapping: &mut ConcreteMapping,
    histogram: &mut BTreeMap<ReferenceKind, u64>,
    stats: &mut ScanStats,
) -> (Option<String>, u64) {
    let kept: Vec<Candidate> = extractor.scan_leaf(leaf, path, stats);
    if kept.is_empty() {
        return (None, 0);
    }

    // Assign placeholders left-to-right so enumeration follows document
    // order, then splice right-to-left to keep earlier offsets valid.
    let mut replacements = Vec::with_capacity(kept.len());
    for candidate in &kept {
        let placeholder = table.assign(candidate);
        let token = table.render(&placeholder);
        *histogram.entry(candidate.kind).or_insert(0) += 1;
        let recorded = mapping
            .entries
            .iter()
            .any(|e| e.token == token && e.path == candidate.path);
        if !recorded {
            mapping.entries.push(MappingEntry {
                token: token.clone(),
                literal: candidate.literal.clone(),
                kind: candidate.kind,
                path: candidate.path.clone(),
            });
        }
        replacements.push((candidate.span, token));
    }

    let mut out = leaf.to_string();
    for (span, token) in replacements.iter().rev() {
        out.replace_range(span.start..span.end, token);
    }
    let count = replacements.len() as u64;
    (Some(out), count)
}
