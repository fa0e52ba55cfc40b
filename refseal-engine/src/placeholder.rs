//! Placeholder generation: stable, per-artifact naming for placeholders.
//!
//! Identical literals reuse the same token; distinct literals of the same
//! kind enumerate (`<file_path>`, `<file_path_2>`, ...). With
//! `named_placeholders` the name carries a short salted tag of the literal
//! instead of an index.

use refseal_common::{short_tag, Candidate, Placeholder, Policy, ReferenceKind};
use std::collections::HashMap;

/// Per-artifact placeholder assignment table.
pub struct PlaceholderTable<'p> {
    policy: &'p Policy,
    assigned: HashMap<(ReferenceKind, &'static str, String), Placeholder>,
    counts: HashMap<(ReferenceKind, &'static str), u32>,
}

impl<'p> PlaceholderTable<'p> {
    pub fn new(policy: &'p Policy) -> Self {
        Self {
            policy,
            assigned: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    /// Assign (or look up) the placeholder for a candidate's literal.
    pub fn assign(&mut self, candidate: &Candidate) -> Placeholder {
        let key = (candidate.kind, candidate.label, candidate.literal.clone());
        if let Some(existing) = self.assigned.get(&key) {
            return existing.clone();
        }

        let placeholder = if self.policy.named_placeholders {
            Placeholder {
                kind: candidate.kind,
                name: format!(
                    "{}_{}",
                    candidate.label,
                    short_tag(&self.policy.hash_salt, &candidate.literal)
                ),
                occurrence_index: 1,
            }
        } else {
            let count = self
                .counts
                .entry((candidate.kind, candidate.label))
                .or_insert(0);
            *count += 1;
            Placeholder {
                kind: candidate.kind,
                name: candidate.label.to_string(),
                occurrence_index: *count,
            }
        };

        self.assigned.insert(key, placeholder.clone());
        placeholder
    }

    /// Render a placeholder with this table's policy syntax.
    pub fn render(&self, placeholder: &Placeholder) -> String {
        placeholder.render(&self.policy.placeholder_syntax)
    }
}
