//! Salted hashing for quarantine records, audit trails, and placeholder
//! name tags.
//!
//! Quarantine and audit rows must be able to prove *which* input they refer
//! to without ever storing it, so everything here is one-way and salted.

/// Salted blake3 hash of `bytes`, rendered as `b3:<hex>`.
pub fn salted_hash(salt: &str, bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(&[0x1f]); // domain separator between salt and payload
    hasher.update(bytes);
    format!("b3:{}", hasher.finalize().to_hex())
}

/// Short stable tag (8 hex chars) for named placeholders.
pub fn short_tag(salt: &str, literal: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(literal.as_bytes());
    hasher.finalize().to_hex()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_salted() {
        let a = salted_hash("salt-a", b"payload");
        let b = salted_hash("salt-a", b"payload");
        let c = salted_hash("salt-b", b"payload");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("b3:"));
    }

    #[test]
    fn hash_never_embeds_input() {
        let h = salted_hash("s", b"sk_live_supersecret");
        assert!(!h.contains("supersecret"));
    }

    #[test]
    fn short_tag_is_stable_and_short() {
        let t = short_tag("s", "/home/alice");
        assert_eq!(t.len(), 8);
        assert_eq!(t, short_tag("s", "/home/alice"));
        assert_ne!(t, short_tag("s", "/home/bob"));
    }
}
