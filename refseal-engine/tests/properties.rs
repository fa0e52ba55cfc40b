//! Property harness for the abstraction and validation laws.

use proptest::prelude::*;
use refseal_common::{Content, Decision, Policy, ReferenceKind};
use refseal_engine::{
    AbstractionEngine, MetricsCollector, QualityScorer, RuleRegistry, ValidationPipeline,
};
use std::sync::Arc;

fn registry() -> Arc<RuleRegistry> {
    Arc::new(RuleRegistry::builtin().unwrap())
}

fn pipeline() -> ValidationPipeline {
    ValidationPipeline::new(registry(), MetricsCollector::new().unwrap(), Policy::default())
        .unwrap()
}

/// Fragments that mix concrete references with ordinary prose.
fn fragment() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("hello"),
        Just("deploy finished"),
        Just("/home/a/x"),
        Just("/home/b/y"),
        Just("/etc/app/cfg.toml"),
        Just("/tmp/scratch/file.bin"),
        Just("john@example.com"),
        Just("ops@corp.io"),
        Just("192.168.0.5"),
        Just("10.1.2.3"),
        Just("sk_live_abcdEFGH1234"),
        Just("xoxb-1234"),
        Just("https://internal.example.com/dash"),
        Just("2024-01-02T03:04:05Z"),
    ]
}

fn mixed_input() -> impl Strategy<Value = String> {
    prop::collection::vec(fragment(), 1..8).prop_map(|parts| parts.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // Abstracting already-abstracted content changes nothing.
    #[test]
    fn abstraction_is_idempotent(input in mixed_input()) {
        let engine = AbstractionEngine::new(registry());
        let policy = Policy::default();
        let first = engine
            .abstract_content(&Content::Text(input), &policy)
            .unwrap();
        let second = engine
            .abstract_content(&first.abstracted_content, &policy)
            .unwrap();
        prop_assert_eq!(first.abstracted_content, second.abstracted_content);
        prop_assert!(second.mapping.is_empty());
    }

    // No enabled matcher fires on accepted output.
    #[test]
    fn accepted_output_is_a_fixed_point(input in mixed_input()) {
        let p = pipeline();
        if let Decision::Accept { artifact, .. } = p.validate(&Content::Text(input)) {
            let flat = refseal_engine::flatten_leaves(&artifact.abstracted_content);
            let reg = registry();
            let policy = Policy::default();
            for rule in reg.enabled_for(&policy) {
                prop_assert!(
                    rule.find(&flat, 0).is_none(),
                    "rule {:?} fired on accepted output",
                    rule.label
                );
            }
        }
    }

    // Identical literals share a token, distinct literals differ.
    #[test]
    fn placeholder_consistency(input in mixed_input()) {
        let engine = AbstractionEngine::new(registry());
        let outcome = engine
            .abstract_content(&Content::Text(input), &Policy::default())
            .unwrap();
        let entries = &outcome.mapping.entries;
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[..i] {
                if a.token == b.token {
                    prop_assert_eq!(&a.literal, &b.literal);
                }
                if a.kind == b.kind && a.literal == b.literal {
                    prop_assert_eq!(&a.token, &b.token);
                }
            }
        }
    }

    // Applying the mapping in reverse reproduces the original text.
    #[test]
    fn reversal_reproduces_original(input in mixed_input()) {
        let engine = AbstractionEngine::new(registry());
        let outcome = engine
            .abstract_content(&Content::Text(input.clone()), &Policy::default())
            .unwrap();
        let Content::Text(mut restored) = outcome.abstracted_content else {
            panic!("expected text content");
        };
        for entry in &outcome.mapping.entries {
            restored = restored.replace(&entry.token, &entry.literal);
        }
        prop_assert_eq!(restored, input);
    }

    // Re-validating accepted output never lowers the score.
    #[test]
    fn rescoring_is_stable(input in mixed_input()) {
        let p = pipeline();
        if let Decision::Accept { artifact, report, .. } = p.validate(&Content::Text(input)) {
            match p.validate(&artifact.abstracted_content) {
                Decision::Accept { report: second, .. } => {
                    prop_assert!(second.score >= report.score - 1e-9);
                }
                other => panic!("re-validation did not accept: {other:?}"),
            }
        }
    }

    // Dropping a mapping entry must not reintroduce its literal.
    #[test]
    fn mapping_removal_never_leaks(input in mixed_input()) {
        let engine = AbstractionEngine::new(registry());
        let outcome = engine
            .abstract_content(&Content::Text(input), &Policy::default())
            .unwrap();
        let Content::Text(abstracted) = &outcome.abstracted_content else {
            panic!("expected text content");
        };
        let mut mapping = outcome.mapping.clone();
        for entry in &outcome.mapping.entries {
            mapping.remove(&entry.token);
            prop_assert!(!abstracted.contains(&entry.literal) || entry.token == entry.literal);
        }
    }

    // Scores are always within [0, 1], whatever the input.
    #[test]
    fn scores_stay_in_unit_interval(input in mixed_input()) {
        let reg = registry();
        let policy = Policy::default();
        let engine = AbstractionEngine::new(reg.clone());
        let outcome = engine
            .abstract_content(&Content::Text(input), &policy)
            .unwrap();
        let report = QualityScorer::for_policy(reg, &policy)
            .unwrap()
            .score(&outcome, &policy);
        prop_assert!((0.0..=1.0).contains(&report.score));
        prop_assert!(report.breakdown.coverage >= 0.0 && report.breakdown.coverage <= 1.0);
    }

    // The pipeline never panics, whatever bytes arrive.
    #[test]
    fn validation_never_panics(input in ".{0,300}") {
        let p = pipeline();
        let _ = p.validate(&Content::Text(input));
    }

    // Extraction confidence is always within [0, 1] and spans are in bounds.
    #[test]
    fn candidates_are_well_formed(input in ".{0,300}") {
        let reg = registry();
        let policy = Policy::default();
        let content = Content::Text(input.clone());
        let extractor = refseal_engine::Extractor::new(&reg, &policy);
        for candidate in extractor.candidates(&content) {
            prop_assert!(candidate.confidence >= 0.0 && candidate.confidence <= 1.0);
            prop_assert!(candidate.span.end <= input.len());
            prop_assert!(candidate.span.start < candidate.span.end);
            prop_assert_eq!(
                ReferenceKind::ALL.iter().filter(|k| **k == candidate.kind).count(),
                1
            );
        }
    }
}
