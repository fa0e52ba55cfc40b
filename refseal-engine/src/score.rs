//! Quality scorer: six dimensions, one composite safety score.
//!
//! The pattern-cleanliness dimension is a hard gate: if any enabled
//! matcher still fires on the output, the composite is clamped below the
//! accept threshold no matter what the other dimensions say.

use crate::engine::AbstractionOutcome;
use crate::entropy::{has_mixed_classes, shannon_entropy, sigmoid};
use crate::extract::flatten_leaves;
use crate::rules::RuleRegistry;
use memchr::memmem;
use refseal_common::{DimensionScores, Policy, ReasonCode, ScoreReport};
use regex::Regex;
use std::sync::Arc;

/// Entropy sigmoid shape: runs at this many bits per byte sit at the
/// half-penalty point.
const ENTROPY_CENTER: f64 = 4.2;
const ENTROPY_STEEPNESS: f64 = 3.0;
/// Minimum run length the entropy-residue dimension inspects.
const ENTROPY_RUN_LEN: usize = 20;
/// Penalty per suspicious keyword/value adjacency in the output.
const CONTEXT_HIT_PENALTY: f64 = 0.25;
/// Clamp distance below the accept threshold when the hard gate fails.
const HARD_GATE_MARGIN: f64 = 1e-9;

const SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "credential",
    "bearer",
];

/// Scores abstraction outcomes against a registry snapshot.
pub struct QualityScorer {
    registry: Arc<RuleRegistry>,
    run_re: Regex,
    placeholder_re: Regex,
}

impl QualityScorer {
    /// Build a scorer for one policy's placeholder syntax.
    pub fn for_policy(registry: Arc<RuleRegistry>, policy: &Policy) -> Result<Self, ScorerError> {
        let (prefix, suffix) = policy
            .placeholder_syntax
            .split_once("{kind}")
            .ok_or(ScorerError::BadSyntax)?;
        let placeholder_re = Regex::new(&format!(
            "{}[a-z][a-z0-9_]*{}",
            regex::escape(prefix),
            regex::escape(suffix)
        ))?;
        let run_re = Regex::new(&format!("[A-Za-z0-9+/=_-]{{{ENTROPY_RUN_LEN},}}"))?;
        Ok(Self {
            registry,
            run_re,
            placeholder_re,
        })
    }

    /// Compute the composite score and per-dimension breakdown.
    pub fn score(&self, outcome: &AbstractionOutcome, policy: &Policy) -> ScoreReport {
        let flat = flatten_leaves(&outcome.abstracted_content);

        let placeholders = self.placeholder_occurrences(&flat, outcome);
        let residuals = self.residual_matches(&flat, policy);

        let coverage = if placeholders + residuals == 0 {
            1.0
        } else {
            placeholders as f64 / (placeholders + residuals) as f64
        };

        let consistency = consistency_dimension(outcome);
        let density = density_dimension(outcome);
        let entropy_residue = self.entropy_dimension(&flat);
        let pattern_cleanliness = if residuals == 0 { 1.0 } else { 0.0 };
        let context_cleanliness = self.context_dimension(&flat);

        let breakdown = DimensionScores {
            coverage,
            consistency,
            density,
            entropy_residue,
            pattern_cleanliness,
            context_cleanliness,
        };

        let w = &policy.dimension_weights;
        let composite = w.coverage * coverage
            + w.consistency * consistency
            + w.density * density
            + w.entropy_residue * entropy_residue
            + w.pattern_cleanliness * pattern_cleanliness
            + w.context_cleanliness * context_cleanliness;
        // Snap to nanoscale so threshold comparisons survive the float
        // error the weight arithmetic accumulates.
        let composite = (composite * 1e9).round() / 1e9;

        let mut reasons = Vec::new();
        let score = if pattern_cleanliness == 0.0 {
            reasons.push(ReasonCode::HardGate);
            composite.min(policy.threshold_accept - HARD_GATE_MARGIN).max(0.0)
        } else {
            composite.clamp(0.0, 1.0)
        };

        ScoreReport {
            score,
            breakdown,
            reasons,
        }
    }

    /// Placeholder-shaped tokens present in `flat`, as matched strings.
    pub fn placeholder_tokens<'h>(&self, flat: &'h str) -> Vec<&'h str> {
        self.placeholder_re
            .find_iter(flat)
            .map(|m| m.as_str())
            .collect()
    }

    /// Occurrences of this artifact's own placeholder tokens in the output.
    fn placeholder_occurrences(&self, flat: &str, outcome: &AbstractionOutcome) -> u64 {
        let mut seen: Vec<&str> = Vec::new();
        let mut total = 0u64;
        for entry in &outcome.mapping.entries {
            if seen.contains(&entry.token.as_str()) {
                continue;
            }
            seen.push(&entry.token);
            total += memmem::find_iter(flat.as_bytes(), entry.token.as_bytes()).count() as u64;
        }
        total
    }

    fn residual_matches(&self, flat: &str, policy: &Policy) -> u64 {
        let mut total = 0u64;
        for rule in self.registry.enabled_for(policy) {
            let mut from = 0;
            while from <= flat.len() {
                let Some(hit) = rule.find(flat, from) else {
                    break;
                };
                total += 1;
                from = hit.span.end.max(from + 1);
            }
        }
        total
    }

    fn entropy_dimension(&self, flat: &str) -> f64 {
        let max_entropy = self
            .run_re
            .find_iter(flat)
            .map(|m| shannon_entropy(m.as_str()))
            .fold(0.0_f64, f64::max);
        if max_entropy == 0.0 {
            1.0
        } else {
            1.0 - sigmoid(max_entropy, ENTROPY_CENTER, ENTROPY_STEEPNESS)
        }
    }

    /// Penalty for sensitive keywords sitting next to literal-looking
    /// values in the output. Placeholders do not count as literals.
    fn context_dimension(&self, flat: &str) -> f64 {
        let lower = flat.to_ascii_lowercase();
        let bytes = lower.as_bytes();
        let mut hits = 0u32;
        for kw in SENSITIVE_KEYWORDS {
            for at in memmem::find_iter(bytes, kw.as_bytes()) {
                if at > 0 && matches!(bytes[at - 1], b'a'..=b'z' | b'0'..=b'9' | b'_' | b'<') {
                    continue;
                }
                let after = &lower[at + kw.len()..];
                let value = after.trim_start_matches([' ', '\t', ':', '=', '"', '\'']);
                if value.starts_with('<') {
                    continue;
                }
                let run: String = value
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+'))
                    .collect();
                if run.len() >= 6 && has_mixed_classes(&run) {
                    hits += 1;
                }
            }
        }
        (1.0 - CONTEXT_HIT_PENALTY * f64::from(hits)).max(0.0)
    }
}

fn consistency_dimension(outcome: &AbstractionOutcome) -> f64 {
    let entries = &outcome.mapping.entries;
    if entries.is_empty() {
        return 1.0;
    }
    let mut violations = 0usize;
    for (i, e) in entries.iter().enumerate() {
        let conflicting_token = entries[..i]
            .iter()
            .any(|prev| prev.token == e.token && prev.literal != e.literal);
        let conflicting_literal = entries[..i]
            .iter()
            .any(|prev| prev.kind == e.kind && prev.literal == e.literal && prev.token != e.token);
        if conflicting_token || conflicting_literal {
            violations += 1;
        }
    }
    1.0 - violations as f64 / entries.len() as f64
}

fn density_dimension(outcome: &AbstractionOutcome) -> f64 {
    let substituted = outcome.diagnostics.substitutions;
    let detected = substituted + outcome.diagnostics.dropped_low_confidence;
    if detected == 0 {
        1.0
    } else {
        substituted as f64 / detected as f64
    }
}

/// Scorer construction failure.
#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("placeholder syntax is missing the {{kind}} slot")]
    BadSyntax,
    #[error("scorer pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AbstractionEngine;
    use refseal_common::Content;

    fn scored(input: &str) -> ScoreReport {
        let registry = Arc::new(RuleRegistry::builtin().unwrap());
        let policy = Policy::default();
        let engine = AbstractionEngine::new(registry.clone());
        let outcome = engine
            .abstract_content(&Content::Text(input.into()), &policy)
            .unwrap();
        QualityScorer::for_policy(registry, &policy)
            .unwrap()
            .score(&outcome, &policy)
    }

    #[test]
    fn clean_text_scores_perfect() {
        let report = scored("hello world");
        assert_eq!(report.score, 1.0);
        assert_eq!(report.breakdown, DimensionScores::PERFECT);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn fully_abstracted_content_scores_above_accept() {
        let report = scored("config at /home/alice/app/cfg.json");
        assert!(report.score >= 0.80, "score was {}", report.score);
        assert_eq!(report.breakdown.pattern_cleanliness, 1.0);
        assert_eq!(report.breakdown.coverage, 1.0);
    }

    #[test]
    fn abstracted_credential_scores_high() {
        let report = scored("key=sk_live_abcdEFGH1234");
        assert!(report.score >= 0.90, "score was {}", report.score);
    }

    #[test]
    fn hard_gate_clamps_below_accept() {
        // Score a hand-built outcome whose content still contains a live
        // reference, as a bypassing caller might hand the store.
        let registry = Arc::new(RuleRegistry::builtin().unwrap());
        let policy = Policy::default();
        let outcome = AbstractionOutcome {
            abstracted_content: Content::Text("contact john@example.com".into()),
            mapping: Default::default(),
            kind_histogram: Default::default(),
            diagnostics: Default::default(),
        };
        let report = QualityScorer::for_policy(registry, &policy)
            .unwrap()
            .score(&outcome, &policy);
        assert_eq!(report.breakdown.pattern_cleanliness, 0.0);
        assert!(report.score < policy.threshold_accept);
        assert!(report.reasons.contains(&ReasonCode::HardGate));
        assert!(report.hard_gate_failed());
    }

    #[test]
    fn high_entropy_residue_is_penalized() {
        let registry = Arc::new(RuleRegistry::builtin().unwrap());
        let policy = Policy::default();
        // A 28-char mixed run: too short for the entropy matcher (so no
        // hard gate) but well inside the entropy-residue dimension.
        let outcome = AbstractionOutcome {
            abstracted_content: Content::Text("blob aZ8kQ2wX9rT4mP7vL1nB5cD3eF end".into()),
            mapping: Default::default(),
            kind_histogram: Default::default(),
            diagnostics: Default::default(),
        };
        let report = QualityScorer::for_policy(registry, &policy)
            .unwrap()
            .score(&outcome, &policy);
        assert!(report.breakdown.entropy_residue < 0.5);
        assert_eq!(report.breakdown.pattern_cleanliness, 1.0);
    }

    #[test]
    fn keyword_next_to_literal_is_penalized() {
        let registry = Arc::new(RuleRegistry::builtin().unwrap());
        let policy = Policy::default();
        let outcome = AbstractionOutcome {
            abstracted_content: Content::Text("the password hunter42x ok".into()),
            mapping: Default::default(),
            kind_histogram: Default::default(),
            diagnostics: Default::default(),
        };
        let report = QualityScorer::for_policy(registry, &policy)
            .unwrap()
            .score(&outcome, &policy);
        assert!(report.breakdown.context_cleanliness <= 0.75);
    }

    #[test]
    fn keyword_next_to_placeholder_is_clean() {
        let report = scored("token=xoxb-12345678 done");
        assert_eq!(report.breakdown.context_cleanliness, 1.0);
        assert!(report.score >= 0.80);
    }

    #[test]
    fn dropped_candidates_lower_density_only() {
        let registry = Arc::new(RuleRegistry::builtin().unwrap());
        let policy = Policy::default();
        let outcome = AbstractionOutcome {
            abstracted_content: Content::Text("all clear".into()),
            mapping: Default::default(),
            kind_histogram: Default::default(),
            diagnostics: crate::engine::Diagnostics {
                passes: 2,
                substitutions: 3,
                dropped_low_confidence: 1,
                overlap_ties: 0,
                decoded_leaves: 0,
            },
        };
        let report = QualityScorer::for_policy(registry, &policy)
            .unwrap()
            .score(&outcome, &policy);
        assert_eq!(report.breakdown.density, 0.75);
        assert_eq!(report.breakdown.pattern_cleanliness, 1.0);
    }
}
