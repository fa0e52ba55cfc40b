//! Validation pipeline: five fail-closed stages.
//!
//! accept-gate -> abstract -> validate -> score -> decide. Any stage
//! failure short-circuits the rest; the caller only ever sees a
//! [`Decision`]. Transient failures (stage deadlines, store hiccups in the
//! persistence glue) are retried with bounded exponential backoff;
//! everything else rejects.

use crate::engine::{AbstractionEngine, AbstractionOutcome};
use crate::extract::{flatten_leaves, string_leaves};
use crate::metrics::MetricsCollector;
use crate::rules::RuleRegistry;
use crate::score::{QualityScorer, ScorerError};
use chrono::Utc;
use memchr::memmem;
use refseal_common::errors::BoundsReason;
use refseal_common::{
    Abstraction, ArtifactId, Content, Decision, Policy, QuarantineEntry, ReasonCode,
    ReviewerStatus, SafetyError, ScoreReport, ValidationStatus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AcceptGate,
    Abstraction,
    Validation,
    Scoring,
    Decision,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AcceptGate => "accept_gate",
            Stage::Abstraction => "abstraction",
            Stage::Validation => "validation",
            Stage::Scoring => "scoring",
            Stage::Decision => "decision",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation plus an optional caller deadline, both checked
/// at stage boundaries only.
#[derive(Clone, Default)]
pub struct ValidationContext {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Request cancellation; takes effect at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Errors that may be retried by [`run_with_retry`].
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SafetyError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Retry policy with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to delay.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay: Duration::from_millis(policy.retry_base_delay_ms),
            max_delay: Duration::from_millis(policy.retry_max_delay_ms),
            jitter: policy.retry_jitter,
        }
    }

    /// Backoff delay for a given attempt (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_secs = self.base_delay.as_secs_f64();
        let max_secs = self.max_delay.as_secs_f64().max(0.0);

        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1)) as f64;
        let mut delay = (base_secs * multiplier).min(max_secs);

        if self.jitter > 0.0 && delay > 0.0 {
            let jitter = (fastrand::f64() * 2.0 - 1.0) * self.jitter;
            delay = (delay * (1.0 + jitter)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Run `op` with retries on retryable errors, sleeping between attempts.
pub fn run_with_retry<F, T, E>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: RetryableError,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(label, attempt, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Pipeline construction failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid policy: {0}")]
    Policy(String),
    #[error(transparent)]
    Scorer(#[from] ScorerError),
}

/// Telemetry buffered during one run and flushed only when the run
/// produces a decision, so a cancelled validation leaves no trace beyond
/// the cancellation counter.
#[derive(Default)]
struct RunTelemetry {
    input_bytes: usize,
    stages: Vec<(Stage, Duration)>,
    overlap_ties: u64,
}

/// The five-stage fail-closed validation pipeline.
pub struct ValidationPipeline {
    engine: AbstractionEngine,
    scorer: QualityScorer,
    metrics: MetricsCollector,
    policy: Policy,
}

impl ValidationPipeline {
    pub fn new(
        registry: Arc<RuleRegistry>,
        metrics: MetricsCollector,
        policy: Policy,
    ) -> Result<Self, PipelineError> {
        if let Some(warning) = policy.validate().first() {
            return Err(PipelineError::Policy(format!(
                "{}: {}",
                warning.field, warning.message
            )));
        }
        let scorer = QualityScorer::for_policy(registry.clone(), &policy)?;
        Ok(Self {
            engine: AbstractionEngine::new(registry),
            scorer,
            metrics,
            policy,
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Validate with default context (no cancellation, no deadline).
    pub fn validate(&self, input: &Content) -> Decision {
        self.validate_with(input, &ValidationContext::new())
    }

    /// Validate under a caller-supplied context.
    pub fn validate_with(&self, input: &Content, ctx: &ValidationContext) -> Decision {
        let retry = RetryPolicy::from_policy(&self.policy);
        let mut attempt = 1;

        loop {
            let mut telemetry = RunTelemetry::default();
            match self.run_once(input, ctx, &mut telemetry) {
                Ok((decision, outcome, report)) => {
                    self.flush_telemetry(&telemetry, &decision, &outcome, &report);
                    return decision;
                }
                Err(SafetyError::Cancelled) => {
                    self.metrics.record_cancelled();
                    debug!("validation cancelled at stage boundary");
                    return Decision::Reject {
                        reasons: vec![ReasonCode::Cancelled],
                    };
                }
                Err(err) if err.is_transient() && attempt < retry.max_attempts() => {
                    let delay = retry.backoff_delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying validation"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    let reasons = err.reason_codes();
                    if matches!(err, SafetyError::InvariantBreach { .. }) {
                        error!(%err, "invariant breach; rejecting artifact");
                    } else {
                        debug!(%err, "validation failed closed");
                    }
                    self.metrics.record_rejected(&reasons);
                    return Decision::Reject { reasons };
                }
            }
        }
    }

    /// One staged run. Returns the outcome/report alongside the decision so
    /// telemetry can be flushed by the caller on completion.
    fn run_once(
        &self,
        input: &Content,
        ctx: &ValidationContext,
        telemetry: &mut RunTelemetry,
    ) -> Result<(Decision, AbstractionOutcome, ScoreReport), SafetyError> {
        telemetry.input_bytes = input.approx_bytes();

        let started = Instant::now();
        self.accept_gate(input)?;
        self.stage_boundary(ctx, Stage::AcceptGate, started, telemetry)?;

        let started = Instant::now();
        let outcome = self.engine.abstract_content(input, &self.policy)?;
        telemetry.overlap_ties = outcome.diagnostics.overlap_ties;
        self.stage_boundary(ctx, Stage::Abstraction, started, telemetry)?;

        let started = Instant::now();
        self.check_invariants(input, &outcome)?;
        self.stage_boundary(ctx, Stage::Validation, started, telemetry)?;

        let started = Instant::now();
        let report = self.scorer.score(&outcome, &self.policy);
        self.stage_boundary(ctx, Stage::Scoring, started, telemetry)?;

        let started = Instant::now();
        let decision = self.decide(input, outcome.clone(), report.clone());
        self.stage_boundary(ctx, Stage::Decision, started, telemetry)?;

        Ok((decision, outcome, report))
    }

    /// Stage 1: size, depth, and encoding sanity bounds.
    fn accept_gate(&self, input: &Content) -> Result<(), SafetyError> {
        if input.is_empty() {
            return Err(SafetyError::InputBounds {
                reason: BoundsReason::Empty,
            });
        }
        if input.approx_bytes() > self.policy.max_input_bytes {
            return Err(SafetyError::InputBounds {
                reason: BoundsReason::TooLarge,
            });
        }
        if input.depth() > self.policy.max_depth {
            return Err(SafetyError::InputBounds {
                reason: BoundsReason::DepthExceeded,
            });
        }
        for (_, leaf) in string_leaves(input) {
            if leaf.contains('\0') {
                return Err(SafetyError::InputBounds {
                    reason: BoundsReason::InvalidEncoding,
                });
            }
        }
        Ok(())
    }

    /// Stage 3: rescan plus the mapping invariants.
    fn check_invariants(
        &self,
        original: &Content,
        outcome: &AbstractionOutcome,
    ) -> Result<(), SafetyError> {
        let flat_out = flatten_leaves(&outcome.abstracted_content);
        let flat_in = flatten_leaves(original);

        // Every mapping entry's token must appear in the output.
        for entry in &outcome.mapping.entries {
            if memmem::find(flat_out.as_bytes(), entry.token.as_bytes()).is_none() {
                return Err(SafetyError::InvariantBreach {
                    detail: format!("mapping token {} missing from output", entry.token),
                });
            }
        }

        // Placeholder reuse must be consistent: one token, one literal, and
        // one token per distinct literal of a kind.
        for (i, e) in outcome.mapping.entries.iter().enumerate() {
            for prev in &outcome.mapping.entries[..i] {
                if prev.token == e.token && prev.literal != e.literal {
                    return Err(SafetyError::InvariantBreach {
                        detail: format!("token {} bound to multiple literals", e.token),
                    });
                }
                if prev.kind == e.kind && prev.literal == e.literal && prev.token != e.token {
                    return Err(SafetyError::InvariantBreach {
                        detail: format!(
                            "one {} literal bound to tokens {} and {}",
                            e.kind, prev.token, e.token
                        ),
                    });
                }
            }
        }

        // Placeholder-shaped tokens the engine did not mint must either
        // pre-exist in the input (templates, re-validation) or be allowed
        // by policy.
        if !self.policy.allow_dangling_placeholders {
            for hit in self.scorer.placeholder_tokens(&flat_out) {
                if outcome.mapping.contains_token(hit) {
                    continue;
                }
                if memmem::find(flat_in.as_bytes(), hit.as_bytes()).is_some() {
                    continue;
                }
                return Err(SafetyError::InvariantBreach {
                    detail: format!("dangling placeholder {hit}"),
                });
            }
        }

        Ok(())
    }

    /// Stage 5: compare the score against policy thresholds.
    fn decide(&self, input: &Content, outcome: AbstractionOutcome, report: ScoreReport) -> Decision {
        if report.hard_gate_failed() {
            info!(score = report.score, "hard gate failed, rejecting");
            return Decision::Reject {
                reasons: report.reasons,
            };
        }

        if report.score >= self.policy.threshold_accept {
            info!(score = report.score, "validation accepted");
            let artifact = Abstraction {
                id: ArtifactId::new(),
                abstracted_content: outcome.abstracted_content,
                kind_histogram: outcome.kind_histogram,
                safety_score: report.score,
                validation_status: ValidationStatus::Validated,
                created_at: None,
                updated_at: None,
            };
            Decision::Accept {
                artifact,
                mapping: outcome.mapping,
                report,
            }
        } else if report.score >= self.policy.threshold_quarantine {
            info!(score = report.score, "validation quarantined");
            let entry = QuarantineEntry {
                id: Uuid::new_v4(),
                original_hash: refseal_common::salted_hash(
                    &self.policy.hash_salt,
                    flatten_leaves(input).as_bytes(),
                ),
                reason_code: ReasonCode::SuspectScore,
                detected_kinds: outcome.kind_histogram.keys().copied().collect(),
                first_seen_at: Utc::now(),
                reviewer_status: ReviewerStatus::PendingReview,
            };
            let mut reasons = vec![ReasonCode::SuspectScore];
            reasons.extend(report.reasons);
            Decision::Quarantine { entry, reasons }
        } else {
            info!(score = report.score, "validation rejected on score");
            let mut reasons = vec![ReasonCode::LowScore];
            reasons.extend(report.reasons);
            Decision::Reject { reasons }
        }
    }

    fn stage_boundary(
        &self,
        ctx: &ValidationContext,
        stage: Stage,
        started: Instant,
        telemetry: &mut RunTelemetry,
    ) -> Result<(), SafetyError> {
        if ctx.is_cancelled() {
            return Err(SafetyError::Cancelled);
        }
        let elapsed = started.elapsed();
        telemetry.stages.push((stage, elapsed));
        let budget = Duration::from_millis(self.stage_timeout_ms(stage));
        if elapsed > budget {
            return Err(SafetyError::TransientInfra {
                detail: format!("stage {stage} exceeded {}ms deadline", budget.as_millis()),
            });
        }
        Ok(())
    }

    fn stage_timeout_ms(&self, stage: Stage) -> u64 {
        let t = &self.policy.stage_timeouts_ms;
        match stage {
            Stage::AcceptGate => t.accept_gate,
            Stage::Abstraction => t.abstraction,
            Stage::Validation => t.validation,
            Stage::Scoring => t.scoring,
            Stage::Decision => t.decision,
        }
    }

    fn flush_telemetry(
        &self,
        telemetry: &RunTelemetry,
        decision: &Decision,
        outcome: &AbstractionOutcome,
        report: &ScoreReport,
    ) {
        self.metrics.observe_input_bytes(telemetry.input_bytes);
        for (stage, duration) in &telemetry.stages {
            self.metrics
                .observe_stage_latency(stage.as_str(), duration.as_secs_f64());
        }
        if telemetry.overlap_ties > 0 {
            self.metrics.record_overlap_ties(telemetry.overlap_ties);
        }
        for (kind, count) in &outcome.kind_histogram {
            self.metrics.observe_extracted(*kind, *count);
        }
        self.metrics.observe_score(report.score);
        match decision {
            Decision::Accept { .. } => self.metrics.record_accepted(),
            Decision::Quarantine { reasons, .. } => self.metrics.record_quarantined(reasons),
            Decision::Reject { reasons } => self.metrics.record_rejected(reasons),
        }
    }
}
