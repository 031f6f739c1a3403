//! File-based journal under the configured journal directory.
//!
//! Layout:
//!
//! ```text
//! <dir>/journal.json
//! <dir>/locks/<device>-<cert>.lock
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::JournalConfig;
use crate::error::{JournalError, Result};

use super::lock::{DEFAULT_LOCK_TTL_SECS, LockInfo};
use super::store::JournalStore;
use super::types::{Journal, JournalEntry};

/// Journal file name.
const JOURNAL_FILE: &str = "journal.json";

/// Lock directory name.
const LOCK_DIR: &str = "locks";

/// Local file-based journal.
#[derive(Debug)]
pub struct LocalJournal {
    base_dir: PathBuf,
    journal_path: PathBuf,
    lock_dir: PathBuf,
    lock_ttl_secs: i64,
}

impl LocalJournal {
    /// Creates a journal rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            journal_path: base_dir.join(JOURNAL_FILE),
            lock_dir: base_dir.join(LOCK_DIR),
            base_dir,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
        }
    }

    /// Creates a journal from configuration.
    #[must_use]
    pub fn from_config(config: &JournalConfig) -> Self {
        Self::with_base_dir(config.resolved_path()).with_lock_ttl(config.lock_ttl_secs)
    }

    /// Overrides the lock expiry.
    #[must_use]
    pub const fn with_lock_ttl(mut self, secs: i64) -> Self {
        self.lock_ttl_secs = secs;
        self
    }

    /// Journal directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn lock_path(&self, target: &str) -> PathBuf {
        self.lock_dir.join(format!("{target}.lock"))
    }

    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating journal directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                JournalError::write(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    async fn read_lock_file(&self, target: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(target);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(JournalError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }
                .into());
            }
        };

        let lock = serde_json::from_str(&content).map_err(|e| JournalError::Corrupted {
            message: format!("Failed to parse lock file {}: {e}", path.display()),
        })?;
        Ok(Some(lock))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock: &LockInfo) -> Result<bool> {
        Self::ensure_dir(&self.lock_dir).await?;

        let content = serde_json::to_string_pretty(lock)
            .map_err(|e| JournalError::write(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(&lock.target))
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(JournalError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| JournalError::LockFailed {
            message: format!("Failed to write lock file: {e}"),
        })?;
        file.sync_all().await.map_err(|e| JournalError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(true)
    }

    async fn delete_lock_file(&self, target: &str) -> Result<bool> {
        match fs::remove_file(self.lock_path(target)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(JournalError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }

    async fn save(&self, journal: &Journal) -> Result<()> {
        Self::ensure_dir(&self.base_dir).await?;

        let content = serde_json::to_string_pretty(journal)
            .map_err(|e| JournalError::write(format!("Failed to serialize journal: {e}")))?;

        // Temp file then rename, so readers never see a partial journal.
        let temp_path = self.journal_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| JournalError::write(format!("Failed to create temp journal: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| JournalError::write(format!("Failed to write journal: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| JournalError::write(format!("Failed to sync journal: {e}")))?;

        fs::rename(&temp_path, &self.journal_path)
            .await
            .map_err(|e| JournalError::write(format!("Failed to rename journal: {e}")))?;

        debug!("Journal saved to {}", self.journal_path.display());
        Ok(())
    }
}

#[async_trait]
impl JournalStore for LocalJournal {
    async fn load(&self) -> Result<Journal> {
        let content = match fs::read_to_string(&self.journal_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No journal at {}", self.journal_path.display());
                return Ok(Journal::new());
            }
            Err(e) => {
                return Err(JournalError::Corrupted {
                    message: format!("Failed to read journal: {e}"),
                }
                .into());
            }
        };

        let journal = serde_json::from_str(&content).map_err(|e| JournalError::Corrupted {
            message: format!("Failed to parse {}: {e}", self.journal_path.display()),
        })?;
        Ok(journal)
    }

    async fn record(&self, entry: JournalEntry) -> Result<()> {
        let mut journal = self.load().await?;
        info!(
            "Journal: {} on {} ({})",
            entry.outcome,
            entry.hostname,
            entry.new_object_name.as_deref().unwrap_or("-")
        );
        journal.record(entry);
        self.save(&journal).await
    }

    async fn acquire_lock(&self, target: &str, holder: &str) -> Result<LockInfo> {
        let lock = LockInfo::new(target, holder, self.lock_ttl_secs);

        if self.create_lock_file(&lock).await? {
            info!("Acquired deployment lock for {target} (expires in {}s)", self.lock_ttl_secs);
            return Ok(lock);
        }

        match self.read_lock_file(target).await? {
            Some(existing) if !existing.is_expired() => {
                return Err(JournalError::LockedByOther {
                    target: target.to_string(),
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            Some(existing) => {
                warn!("Taking over expired lock for {target} held by {}", existing.holder);
                self.delete_lock_file(target).await?;
            }
            None => {}
        }

        if self.create_lock_file(&lock).await? {
            info!("Acquired deployment lock for {target}");
            Ok(lock)
        } else {
            Err(JournalError::LockFailed {
                message: format!("Lock for {target} was taken concurrently"),
            }
            .into())
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> Result<()> {
        match self.read_lock_file(&lock.target).await? {
            Some(existing) if existing.lock_id == lock.lock_id => {
                self.delete_lock_file(&lock.target).await?;
                info!("Released deployment lock for {}", lock.target);
            }
            Some(existing) => {
                debug!(
                    "Lock for {} now held by {}, leaving it",
                    lock.target, existing.holder
                );
            }
            None => {}
        }
        Ok(())
    }

    async fn lock_info(&self, target: &str) -> Result<Option<LockInfo>> {
        self.read_lock_file(target).await
    }

    async fn force_unlock(&self, target: &str) -> Result<bool> {
        let removed = self.delete_lock_file(target).await?;
        if removed {
            warn!("Forcibly removed deployment lock for {target}");
        }
        Ok(removed)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CertflowError;
    use crate::gateway::DeviceRef;
    use crate::journal::RunOutcome;
    use tempfile::TempDir;

    fn create_test_journal() -> (LocalJournal, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let journal = LocalJournal::with_base_dir(temp_dir.path());
        (journal, temp_dir)
    }

    fn entry(outcome: RunOutcome) -> JournalEntry {
        let device = DeviceRef::new(7, "bigip-01.example.net", "10.0.0.7");
        JournalEntry::new(&device, "pfx", outcome).with_object("www_example_com_2026")
    }

    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let (journal, _temp) = create_test_journal();
        let loaded = journal.load().await.expect("loads");
        assert!(loaded.entries.is_empty());
    }

    #[tokio::test]
    async fn test_record_and_load() {
        let (journal, temp) = create_test_journal();

        journal.record(entry(RunOutcome::Planned)).await.expect("records");
        journal.record(entry(RunOutcome::Deployed)).await.expect("records");

        let loaded = journal.load().await.expect("loads");
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[1].outcome, RunOutcome::Deployed);
        assert!(!temp.path().join("journal.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupted_journal_is_reported() {
        let (journal, temp) = create_test_journal();
        std::fs::write(temp.path().join(JOURNAL_FILE), "{ not json").expect("write");

        let err = journal.load().await.expect_err("corrupted");
        assert!(matches!(err, CertflowError::Journal(JournalError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (journal, _temp) = create_test_journal();

        let lock = journal.acquire_lock("7-www_example_com_2025", "holder-1").await.expect("acquires");
        assert!(journal.lock_info("7-www_example_com_2025").await.expect("reads").is_some());

        journal.release_lock(&lock).await.expect("releases");
        assert!(journal.lock_info("7-www_example_com_2025").await.expect("reads").is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (journal, _temp) = create_test_journal();

        let _held = journal.acquire_lock("7-a", "holder-1").await.expect("acquires");
        let err = journal.acquire_lock("7-a", "holder-2").await.expect_err("conflict");
        assert!(matches!(
            err,
            CertflowError::Journal(JournalError::LockedByOther { ref holder, .. }) if holder == "holder-1"
        ));

        journal.acquire_lock("7-b", "holder-2").await.expect("other target is free");
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let temp = TempDir::new().expect("temp dir");
        let stale = LocalJournal::with_base_dir(temp.path()).with_lock_ttl(-1);
        stale.acquire_lock("7-a", "crashed").await.expect("acquires");

        let journal = LocalJournal::with_base_dir(temp.path());
        let lock = journal.acquire_lock("7-a", "holder-2").await.expect("takes over");
        assert_eq!(lock.holder, "holder-2");
    }

    #[tokio::test]
    async fn test_release_keeps_foreign_lock_and_force_unlock() {
        let (journal, _temp) = create_test_journal();
        let first = journal.acquire_lock("7-a", "holder-1").await.expect("acquires");
        journal.force_unlock("7-a").await.expect("unlocks");
        let _second = journal.acquire_lock("7-a", "holder-2").await.expect("acquires");

        journal.release_lock(&first).await.expect("no-op");
        let current = journal.lock_info("7-a").await.expect("reads").expect("still held");
        assert_eq!(current.holder, "holder-2");

        assert!(journal.force_unlock("7-a").await.expect("unlocks"));
        assert!(!journal.force_unlock("7-a").await.expect("no lock"));
    }
}
