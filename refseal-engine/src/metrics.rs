//! Safety telemetry: counters and distributions for every validation.
//!
//! The collector is an injected handle, not a global. Cloning is cheap and
//! all updates go through lock-free prometheus primitives, so concurrent
//! validations share one collector safely.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use refseal_common::{ReasonCode, ReferenceKind};
use std::sync::Arc;

/// Cloneable handle over the metric registry.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    extracted_by_kind: IntCounterVec,
    accepted: IntCounter,
    rejected_by_reason: IntCounterVec,
    quarantined_by_reason: IntCounterVec,
    cancelled: IntCounter,
    overlap_ties: IntCounter,
    score: Histogram,
    stage_latency: HistogramVec,
    input_bytes: Histogram,
    policy_stale: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let extracted_by_kind = IntCounterVec::new(
            Opts::new(
                "refseal_extracted_total",
                "Concrete references abstracted, by reference kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(extracted_by_kind.clone()))?;

        let accepted = IntCounter::new("refseal_accepted_total", "Validations accepted")?;
        registry.register(Box::new(accepted.clone()))?;

        let rejected_by_reason = IntCounterVec::new(
            Opts::new("refseal_rejected_total", "Validations rejected, by primary reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_by_reason.clone()))?;

        let quarantined_by_reason = IntCounterVec::new(
            Opts::new(
                "refseal_quarantined_total",
                "Validations quarantined, by primary reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(quarantined_by_reason.clone()))?;

        let cancelled = IntCounter::new("refseal_cancelled_total", "Validations cancelled")?;
        registry.register(Box::new(cancelled.clone()))?;

        let overlap_ties = IntCounter::new(
            "refseal_overlap_ties_total",
            "Full-tie detector overlaps (registry bug indicator)",
        )?;
        registry.register(Box::new(overlap_ties.clone()))?;

        let score = Histogram::with_opts(
            HistogramOpts::new("refseal_safety_score", "Composite safety score distribution")
                .buckets(prometheus::linear_buckets(0.0, 0.1, 11)?),
        )?;
        registry.register(Box::new(score.clone()))?;

        let stage_latency = HistogramVec::new(
            HistogramOpts::new(
                "refseal_stage_latency_seconds",
                "Wall time per pipeline stage",
            )
            .buckets(prometheus::exponential_buckets(0.0005, 2.0, 12)?),
            &["stage"],
        )?;
        registry.register(Box::new(stage_latency.clone()))?;

        let input_bytes = Histogram::with_opts(
            HistogramOpts::new("refseal_input_bytes", "Validated input size distribution")
                .buckets(prometheus::exponential_buckets(64.0, 4.0, 12)?),
        )?;
        registry.register(Box::new(input_bytes.clone()))?;

        let policy_stale = IntGauge::new(
            "refseal_policy_stale",
            "1 when the loaded policy predates the newest policy source",
        )?;
        registry.register(Box::new(policy_stale.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                extracted_by_kind,
                accepted,
                rejected_by_reason,
                quarantined_by_reason,
                cancelled,
                overlap_ties,
                score,
                stage_latency,
                input_bytes,
                policy_stale,
            }),
        })
    }

    /// Metric families for whatever exposition endpoint the caller wires.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.inner.registry.gather()
    }

    pub fn observe_extracted(&self, kind: ReferenceKind, count: u64) {
        self.inner
            .extracted_by_kind
            .with_label_values(&[kind.as_str()])
            .inc_by(count);
    }

    pub fn record_accepted(&self) {
        self.inner.accepted.inc();
    }

    pub fn record_rejected(&self, reasons: &[ReasonCode]) {
        let primary = reasons.first().map(|r| r.as_str()).unwrap_or("unknown");
        self.inner
            .rejected_by_reason
            .with_label_values(&[primary])
            .inc();
    }

    pub fn record_quarantined(&self, reasons: &[ReasonCode]) {
        let primary = reasons.first().map(|r| r.as_str()).unwrap_or("unknown");
        self.inner
            .quarantined_by_reason
            .with_label_values(&[primary])
            .inc();
    }

    pub fn record_cancelled(&self) {
        self.inner.cancelled.inc();
    }

    pub fn record_overlap_ties(&self, count: u64) {
        self.inner.overlap_ties.inc_by(count);
    }

    pub fn observe_score(&self, score: f64) {
        self.inner.score.observe(score);
    }

    pub fn observe_stage_latency(&self, stage: &str, seconds: f64) {
        self.inner
            .stage_latency
            .with_label_values(&[stage])
            .observe(seconds);
    }

    pub fn observe_input_bytes(&self, bytes: usize) {
        self.inner.input_bytes.observe(bytes as f64);
    }

    pub fn set_policy_stale(&self, stale: bool) {
        self.inner.policy_stale.set(i64::from(stale));
    }
}
