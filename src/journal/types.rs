//! Journal records.
//!
//! The journal is a local, append-mostly history of what this machine asked
//! the backend to do. It is informational: the backend remains the source of
//! truth for what is installed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::DeviceRef;

/// Current version of the journal format.
pub const JOURNAL_VERSION: &str = "1";

/// Number of entries kept.
pub const MAX_ENTRIES: usize = 100;

/// The complete journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    /// Format version.
    pub version: String,
    /// Entries, oldest first.
    #[serde(default)]
    pub entries: Vec<JournalEntry>,
    /// When the journal was last written.
    pub last_updated: DateTime<Utc>,
}

/// How a recorded run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Dry run; a plan was produced.
    Planned,
    /// Execution succeeded on every planned profile.
    Deployed,
    /// Execution succeeded but some planned profiles were not updated.
    Partial,
    /// Execution stopped at the confirmation gate.
    Blocked,
    /// Planning or execution failed.
    Failed,
}

/// One recorded run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    /// Entry identifier.
    pub id: String,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Target device id.
    pub device_id: u64,
    /// Target device hostname.
    pub hostname: String,
    /// Certificate being replaced.
    #[serde(default)]
    pub old_cert_name: Option<String>,
    /// Object created or planned.
    #[serde(default)]
    pub new_object_name: Option<String>,
    /// Material mode (`pfx`, `pem`, `reference`).
    pub mode: String,
    /// Outcome.
    pub outcome: RunOutcome,
    /// Profiles updated, or planned for a dry run.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Executed past a drift or failed live check.
    #[serde(default)]
    pub drift_accepted: bool,
    /// Error message for failed runs.
    #[serde(default)]
    pub error: Option<String>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: JOURNAL_VERSION.to_string(),
            entries: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Appends an entry, dropping the oldest beyond [`MAX_ENTRIES`].
    pub fn record(&mut self, entry: JournalEntry) {
        if self.entries.len() >= MAX_ENTRIES {
            let excess = self.entries.len() + 1 - MAX_ENTRIES;
            self.entries.drain(..excess);
        }
        self.entries.push(entry);
        self.last_updated = Utc::now();
    }

    /// Most recent entries first, optionally filtered by device.
    #[must_use]
    pub fn recent(&self, device_id: Option<u64>, limit: usize) -> Vec<&JournalEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| device_id.is_none_or(|id| e.device_id == id))
            .take(limit)
            .collect()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalEntry {
    /// Creates an entry for a run against `device`.
    #[must_use]
    pub fn new(device: &DeviceRef, mode: &str, outcome: RunOutcome) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            device_id: device.id,
            hostname: device.hostname.clone(),
            old_cert_name: None,
            new_object_name: None,
            mode: mode.to_string(),
            outcome,
            profiles: Vec::new(),
            drift_accepted: false,
            error: None,
        }
    }

    /// Sets the replaced certificate.
    #[must_use]
    pub fn with_old_cert(mut self, name: Option<&str>) -> Self {
        self.old_cert_name = name.map(str::to_string);
        self
    }

    /// Sets the new object name.
    #[must_use]
    pub fn with_object(mut self, name: impl Into<String>) -> Self {
        self.new_object_name = Some(name.into());
        self
    }

    /// Sets the profiles.
    #[must_use]
    pub fn with_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Marks the run as executed past the confirmation gate.
    #[must_use]
    pub const fn with_drift_accepted(mut self, accepted: bool) -> Self {
        self.drift_accepted = accepted;
        self
    }

    /// Records a failure message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let outcome = match self {
            Self::Planned => "planned",
            Self::Deployed => "deployed",
            Self::Partial => "partial",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        };
        write!(f, "{outcome}")
    }
}
