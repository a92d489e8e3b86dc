//! Deterministic identities for derived records.
//!
//! Process-pair and flow-source records have no natural identity of their own; they are derived
//! from a tuple of fields that already identify them uniquely within a manager. [`StableIdProvider`]
//! hashes a fixed discriminator plus those fields into a stable, process-independent string so that
//! re-deriving the same tuple always yields the same record identity (the dedup invariants in §8 of
//! the crate's design doc depend on this).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Derives stable identities for aggregate records from a discriminator and a set of parts.
///
/// `DefaultHasher` is unspecified across standard library versions in general, but it is not seeded
/// from process entropy (unlike `HashMap`'s `RandomState`), so a given `(discriminator, parts)`
/// tuple hashes identically across calls within one build. That is all the determinism this needs:
/// ids only have to be stable for the lifetime of a running process and reproducible enough for
/// tests, not portable across Rust versions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StableIdProvider;

impl StableIdProvider {
    pub fn new() -> Self {
        StableIdProvider
    }

    /// Builds a stable id from a discriminator (e.g. `"processpair"`) and ordered parts.
    pub fn id(&self, discriminator: &str, parts: &[&str]) -> String {
        let mut hasher = DefaultHasher::new();
        discriminator.hash(&mut hasher);
        for part in parts {
            0xFFu8.hash(&mut hasher); // part separator, avoids "ab","c" colliding with "a","bc"
            part.hash(&mut hasher);
        }
        format!("{discriminator}-{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_parts_same_id() {
        let idp = StableIdProvider::new();
        let a = idp.id("processpair", &["p1", "p2", "tcp"]);
        let b = idp.id("processpair", &["p1", "p2", "tcp"]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_parts_different_id() {
        let idp = StableIdProvider::new();
        let a = idp.id("processpair", &["p1", "p2", "tcp"]);
        let b = idp.id("processpair", &["p1", "p2", "udp"]);
        assert_ne!(a, b);
    }

    #[test]
    fn discriminator_is_part_of_identity() {
        let idp = StableIdProvider::new();
        let a = idp.id("processpair", &["p1", "p2"]);
        let b = idp.id("flowsource", &["p1", "p2"]);
        assert_ne!(a, b);
    }

    #[test]
    fn part_boundary_is_not_ambiguous() {
        let idp = StableIdProvider::new();
        let a = idp.id("x", &["ab", "c"]);
        let b = idp.id("x", &["a", "bc"]);
        assert_ne!(a, b);
    }
}
