//! Rule registry: the immutable catalog of detection rules.
//!
//! A rule pairs a [`Matcher`] with the reference kind it detects, a
//! priority for overlap resolution, and the placeholder label it renders.
//! The registry is immutable after load; a policy reload builds a fresh
//! `Arc<RuleRegistry>` and in-flight validations finish against the
//! snapshot they started with.

use crate::entropy::{has_mixed_classes, shannon_entropy};
use refseal_common::{Policy, ReferenceKind, Span};
use regex::Regex;

/// One detector hit: an exact span plus the matcher's confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleMatch {
    pub span: Span,
    pub confidence: f64,
}

/// A deterministic, side-effect-free detector.
///
/// `find` reports the leftmost match at or after `from`, with exact byte
/// spans into `haystack`.
pub trait Matcher: Send + Sync {
    fn find(&self, haystack: &str, from: usize) -> Option<RuleMatch>;
}

/// Post-match acceptance hook: returns a confidence multiplier, or `None`
/// to reject the match outright (e.g. an IPv4 hit with an octet over 255).
type AcceptFn = fn(&str) -> Option<f64>;

/// Regex-backed matcher with optional capture-group narrowing, a
/// not-followed-by boundary check, and an acceptance hook.
pub struct RegexMatcher {
    re: Regex,
    group: usize,
    base_confidence: f64,
    not_followed_by: Option<fn(char) -> bool>,
    accept: Option<AcceptFn>,
}

impl RegexMatcher {
    pub fn new(pattern: &str, base_confidence: f64) -> Result<Self, regex::Error> {
        Ok(Self {
            re: Regex::new(pattern)?,
            group: 0,
            base_confidence,
            not_followed_by: None,
            accept: None,
        })
    }

    /// Report only capture group `group` instead of the whole match.
    pub fn capture(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    /// Reject matches whose next character satisfies `pred`. Substitute for
    /// lookahead, which the regex engine does not support.
    pub fn not_followed_by(mut self, pred: fn(char) -> bool) -> Self {
        self.not_followed_by = Some(pred);
        self
    }

    pub fn accept_with(mut self, accept: AcceptFn) -> Self {
        self.accept = Some(accept);
        self
    }
}

impl Matcher for RegexMatcher {
    fn find(&self, haystack: &str, from: usize) -> Option<RuleMatch> {
        let mut at = from;
        while at <= haystack.len() {
            let caps = self.re.captures_at(haystack, at)?;
            let whole = caps.get(0)?;
            let Some(m) = caps.get(self.group) else {
                at = next_boundary(haystack, whole.end().max(at + 1));
                continue;
            };

            let mut ok = !m.is_empty();
            if ok && let Some(pred) = self.not_followed_by {
                if let Some(next) = haystack[m.end()..].chars().next()
                    && pred(next)
                {
                    ok = false;
                }
            }
            let mut confidence = self.base_confidence;
            if ok && let Some(accept) = self.accept {
                match accept(m.as_str()) {
                    Some(mult) => confidence = (confidence * mult).clamp(0.0, 1.0),
                    None => ok = false,
                }
            }
            if ok {
                return Some(RuleMatch {
                    span: Span::new(m.start(), m.end()),
                    confidence,
                });
            }
            at = next_boundary(haystack, whole.start() + 1);
        }
        None
    }
}

fn next_boundary(haystack: &str, mut at: usize) -> usize {
    while at < haystack.len() && !haystack.is_char_boundary(at) {
        at += 1;
    }
    at
}

/// Detector for high-entropy blobs that no shape-specific rule caught:
/// long base64-looking runs that mix letters and digits.
pub struct EntropyMatcher {
    run: Regex,
    min_entropy: f64,
    base_confidence: f64,
}

impl EntropyMatcher {
    pub fn new(min_len: usize, min_entropy: f64, base_confidence: f64) -> Result<Self, regex::Error> {
        Ok(Self {
            run: Regex::new(&format!("[A-Za-z0-9+/=_-]{{{min_len},}}"))?,
            min_entropy,
            base_confidence,
        })
    }
}

impl Matcher for EntropyMatcher {
    fn find(&self, haystack: &str, from: usize) -> Option<RuleMatch> {
        let mut at = from;
        while let Some(m) = self.run.find_at(haystack, at) {
            let entropy = shannon_entropy(m.as_str());
            if entropy >= self.min_entropy && has_mixed_classes(m.as_str()) {
                // Scale confidence with how far past the threshold the run is.
                let margin = ((entropy - self.min_entropy) / 1.5).clamp(0.0, 0.3);
                return Some(RuleMatch {
                    span: Span::new(m.start(), m.end()),
                    confidence: (self.base_confidence + margin).min(1.0),
                });
            }
            at = next_boundary(haystack, m.end().max(at + 1));
        }
        None
    }
}

/// A detection rule: kind, label, ordering, and its matcher.
pub struct Rule {
    pub kind: ReferenceKind,
    /// Placeholder base name this rule renders (`file_path`, `api_key`, ...).
    pub label: &'static str,
    /// Higher priority wins overlap resolution.
    pub priority: u32,
    /// Candidates below this confidence are dropped.
    pub min_confidence: f64,
    pub enabled: bool,
    matcher: Box<dyn Matcher>,
}

impl Rule {
    pub fn new(
        kind: ReferenceKind,
        label: &'static str,
        priority: u32,
        min_confidence: f64,
        matcher: Box<dyn Matcher>,
    ) -> Self {
        Self {
            kind,
            label,
            priority,
            min_confidence,
            enabled: true,
            matcher,
        }
    }

    pub fn find(&self, haystack: &str, from: usize) -> Option<RuleMatch> {
        self.matcher.find(haystack, from)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("priority", &self.priority)
            .field("min_confidence", &self.min_confidence)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Registry construction failure.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid detector pattern for {kind}: {source}")]
    Pattern {
        kind: ReferenceKind,
        #[source]
        source: regex::Error,
    },
}

/// Immutable, deterministic catalog of rules.
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    /// Build the builtin catalog covering every [`ReferenceKind`].
    pub fn builtin() -> Result<Self, RegistryError> {
        Ok(Self::from_rules(crate::patterns::builtin_rules()?))
    }

    /// Build a registry from explicit rules, normalizing iteration order.
    pub fn from_rules(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| kind_order(a.kind).cmp(&kind_order(b.kind)))
                .then_with(|| a.label.cmp(b.label))
        });
        Self { rules }
    }

    /// Rules for one kind, ordered by descending priority.
    pub fn rules_for(&self, kind: ReferenceKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.kind == kind)
    }

    /// Every enabled rule in deterministic order.
    pub fn all_enabled(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    /// Enabled rules further filtered by the policy's kind allowlist.
    pub fn enabled_for<'a>(&'a self, policy: &'a Policy) -> impl Iterator<Item = &'a Rule> {
        self.all_enabled().filter(|r| policy.is_enabled(r.kind))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn kind_order(kind: ReferenceKind) -> usize {
    ReferenceKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(usize::MAX)
}
