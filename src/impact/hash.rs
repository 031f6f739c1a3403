//! Snapshot hashing for quick equality checks and log correlation.
//!
//! The digest covers the normalized profile/VIP set only. Source and capture
//! time are excluded, so a cache snapshot and a live snapshot with the same
//! content hash identically.

use sha2::{Digest, Sha256};

use super::drift::normalize;
use super::types::ProfileRef;

/// Hasher for impact snapshots.
#[derive(Debug, Default)]
pub struct SnapshotHasher;

impl SnapshotHasher {
    /// Creates a new snapshot hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a profile set. Order of profiles and VIPs, and
    /// duplicate entries, do not affect the result.
    #[must_use]
    pub fn hash_profiles(&self, profiles: &[ProfileRef]) -> String {
        let mut hasher = Sha256::new();

        for (key, vips) in normalize(profiles) {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            for vip in vips {
                hasher.update(vip.as_bytes());
                hasher.update([0u8]);
            }
            hasher.update([1u8]);
        }

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
    fn test_hash_ignores_order_and_duplicates() {
        let hasher = SnapshotHasher::new();
        let a = vec![
            ProfileRef::new("Common", "p1", &["v1", "v2"]),
            ProfileRef::new("Common", "p2", &[]),
        ];
        let b = vec![
            ProfileRef::new("Common", "p2", &[]),
            ProfileRef::new("Common", "p1", &["v2", "v1", "v1"]),
        ];

        assert_eq!(hasher.hash_profiles(&a), hasher.hash_profiles(&b));
    }

    #[test]
    fn test_hash_separates_vip_membership() {
        let hasher = SnapshotHasher::new();
        let with_vip = vec![ProfileRef::new("Common", "p1", &["v1"])];
        let without_vip = vec![ProfileRef::new("Common", "p1", &[])];
        let other_partition = vec![ProfileRef::new("Tenant", "p1", &["v1"])];

        let h1 = hasher.hash_profiles(&with_vip);
        assert_ne!(h1, hasher.hash_profiles(&without_vip));
        assert_ne!(h1, hasher.hash_profiles(&other_partition));
    }

    #[test]
    fn test_short_hash() {
        let hasher = SnapshotHasher::new();
        let full = hasher.hash_profiles(&[]);
        assert_eq!(hasher.short_hash(&full).len(), 8);
    }
}
