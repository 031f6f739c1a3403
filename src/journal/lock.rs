//! Per-target deployment locks.
//!
//! A lock guards one (device, certificate) pair so two operators on the same
//! machine, or two terminals, cannot execute against it concurrently.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default lock expiry in seconds.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 300;

/// Information about a held lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Locked target key.
    pub target: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates lock info for `target` expiring after `ttl_secs`.
    #[must_use]
    pub fn new(target: &str, holder: &str, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            target: target.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Lock key for a (device, certificate) pair, safe to use as a file name.
#[must_use]
pub fn lock_target(device_id: u64, cert_name: &str) -> String {
    let cert: String = cert_name
        .trim_start_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    format!("{device_id}-{cert}")
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());
    let pid = std::process::id();
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_expiry() {
        let lock = LockInfo::new("7-www_example_com_2025", "tester", DEFAULT_LOCK_TTL_SECS);
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);

        let stale = LockInfo::new("7-www_example_com_2025", "tester", -1);
        assert!(stale.is_expired());
        assert_eq!(stale.remaining_secs(), 0);
    }

    #[test]
    fn test_lock_target_is_file_safe() {
        assert_eq!(lock_target(7, "www_example_com_2025"), "7-www_example_com_2025");
        assert_eq!(lock_target(7, "/Common/app cert"), "7-Common_app_cert");
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();
        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
