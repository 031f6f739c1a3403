//! Journal store trait.

use async_trait::async_trait;

use crate::error::Result;

use super::lock::LockInfo;
use super::types::{Journal, JournalEntry};

/// Storage for the deployment journal and target locks.
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// Loads the journal. Returns an empty journal if none exists yet.
    async fn load(&self) -> Result<Journal>;

    /// Appends an entry and persists the journal.
    async fn record(&self, entry: JournalEntry) -> Result<()>;

    /// Acquires the lock for `target`. An expired lock is taken over.
    async fn acquire_lock(&self, target: &str, holder: &str) -> Result<LockInfo>;

    /// Releases a lock previously acquired. A lock held by someone else is
    /// left in place.
    async fn release_lock(&self, lock: &LockInfo) -> Result<()>;

    /// Current lock for `target`, expired or not.
    async fn lock_info(&self, target: &str) -> Result<Option<LockInfo>>;

    /// Removes the lock for `target` regardless of holder. Returns whether a
    /// lock existed.
    async fn force_unlock(&self, target: &str) -> Result<bool>;

    /// Backend name for display.
    fn backend_type(&self) -> &'static str;
}
