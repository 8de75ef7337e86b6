//! Spec hashing for applied-state tracking.
//!
//! The hash of the desired record that was last applied successfully is kept
//! in status, so operators can tell whether status describes the current spec.

use sha2::{Digest, Sha256};

use crate::backend::DesiredUser;

/// Hasher for desired user records.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a desired record.
    #[must_use]
    pub fn hash_user(&self, user: &DesiredUser) -> String {
        let mut hasher = Sha256::new();

        // Length-prefixed so that ("ab", "c") and ("a", "bc") differ.
        for field in [user.name.as_str(), user.email.as_str()] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(if user.enabled { [1u8] } else { [0u8] });

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let hasher = SpecHasher::new();
        let user = DesiredUser::new("alice", "a@x.com", true);
        assert_eq!(hasher.hash_user(&user), hasher.hash_user(&user.clone()));
    }

    #[test]
    fn test_every_field_affects_hash() {
        let hasher = SpecHasher::new();
        let base = DesiredUser::new("alice", "a@x.com", true);
        let base_hash = hasher.hash_user(&base);

        assert_ne!(base_hash, hasher.hash_user(&DesiredUser::new("alicf", "a@x.com", true)));
        assert_ne!(base_hash, hasher.hash_user(&DesiredUser::new("alice", "b@x.com", true)));
        assert_ne!(base_hash, hasher.hash_user(&DesiredUser::new("alice", "a@x.com", false)));
    }

    #[test]
    fn test_field_boundaries() {
        let hasher = SpecHasher::new();
        assert_ne!(
            hasher.hash_user(&DesiredUser::new("ab", "c", true)),
            hasher.hash_user(&DesiredUser::new("a", "bc", true))
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = SpecHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }
}
