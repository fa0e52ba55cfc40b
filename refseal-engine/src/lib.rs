//! Refseal engine: detection, abstraction, scoring, and validation.
//!
//! Every content-bearing operation flows through [`ValidationPipeline`],
//! which composes the rule registry, the reference extractor, the
//! placeholder generator, the abstraction engine, and the quality scorer
//! into a five-stage fail-closed pipeline. The only output shape is a
//! [`refseal_common::Decision`].
//!
//! Concurrency model: validations are self-contained synchronous
//! computations. The registry is an immutable shared snapshot and the
//! metrics collector is a lock-free injected handle, so independent
//! validations can run on as many threads as the caller likes.

pub mod engine;
pub mod entropy;
pub mod extract;
pub mod metrics;
mod patterns;
pub mod pipeline;
pub mod placeholder;
pub mod rules;
pub mod score;

pub use engine::{AbstractionEngine, AbstractionOutcome, Diagnostics};
pub use extract::{CandidateStream, Extractor, ScanStats, flatten_leaves, string_leaves};
pub use metrics::MetricsCollector;
pub use pipeline::{
    PipelineError, RetryPolicy, RetryableError, Stage, ValidationContext, ValidationPipeline,
    run_with_retry,
};
pub use placeholder::PlaceholderTable;
pub use rules::{EntropyMatcher, Matcher, RegexMatcher, RegistryError, Rule, RuleMatch, RuleRegistry};
pub use score::{QualityScorer, ScorerError};
