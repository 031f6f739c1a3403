//! Impact snapshot types.
//!
//! A snapshot is the set of client-side TLS profiles (and the virtual servers
//! attached to them) that reference a certificate on one device at one point
//! in time. Snapshots are captured, compared and superseded. They are never
//! mutated after capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::DEFAULT_PARTITION;

use super::hash::SnapshotHasher;

/// A virtual server attached to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireVip")]
pub struct VipRef {
    /// Virtual server name.
    pub name: String,
    /// Whether the virtual server is enabled.
    pub enabled: bool,
}

/// VIPs arrive either as bare names or as objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireVip {
    Name(String),
    Full {
        name: String,
        #[serde(default = "enabled_default")]
        enabled: bool,
    },
}

const fn enabled_default() -> bool {
    true
}

impl From<WireVip> for VipRef {
    fn from(wire: WireVip) -> Self {
        match wire {
            WireVip::Name(name) => Self { name, enabled: true },
            WireVip::Full { name, enabled } => Self { name, enabled },
        }
    }
}

impl VipRef {
    /// Creates an enabled VIP reference.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }
}

/// A TLS profile referencing the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRef {
    /// Profile name.
    pub name: String,
    /// Administrative partition.
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Profile context (client or server side).
    #[serde(default)]
    pub context: String,
    /// Virtual servers using the profile.
    #[serde(default)]
    pub vips: Vec<VipRef>,
}

fn default_partition() -> String {
    String::from(DEFAULT_PARTITION)
}

impl ProfileRef {
    /// Creates a profile in the given partition with the named VIPs.
    #[must_use]
    pub fn new(partition: impl Into<String>, name: impl Into<String>, vips: &[&str]) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
            context: String::from("clientside"),
            vips: vips.iter().map(|v| VipRef::new(*v)).collect(),
        }
    }

    /// Identity key: `partition/name`.
    #[must_use]
    pub fn key(&self) -> String {
        profile_key(&self.partition, &self.name)
    }

    /// VIP names as a set.
    #[must_use]
    pub fn vip_names(&self) -> BTreeSet<String> {
        self.vips.iter().map(|v| v.name.clone()).collect()
    }
}

/// Builds a profile key from its parts. A leading `/` on either side is dropped
/// so `/Common/app` and `Common/app` name the same profile.
#[must_use]
pub fn profile_key(partition: &str, name: &str) -> String {
    let partition = partition.trim_matches('/');
    let partition = if partition.is_empty() { DEFAULT_PARTITION } else { partition };
    format!("{partition}/{}", name.trim_start_matches('/'))
}

/// Normalizes a user-supplied profile selection (`/Common/app`, `Common/app`)
/// to key form.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim().trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((partition, name)) => profile_key(partition, name),
        None => profile_key(DEFAULT_PARTITION, trimmed),
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Inventory cache.
    Cache,
    /// Live query against the appliance.
    Live,
    /// No data could be obtained.
    None,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Live => write!(f, "live"),
            Self::None => write!(f, "none"),
        }
    }
}

/// The set of profiles referencing a certificate, as captured at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactSnapshot {
    /// Affected profiles.
    pub profiles: Vec<ProfileRef>,
    /// Origin of the data.
    pub source: SnapshotSource,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
    /// Operator-facing note, set when nothing could be obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
}

impl ImpactSnapshot {
    /// Snapshot taken from the inventory cache.
    #[must_use]
    pub fn from_cache(profiles: Vec<ProfileRef>) -> Self {
        Self::captured(profiles, SnapshotSource::Cache)
    }

    /// Snapshot taken from a live query.
    #[must_use]
    pub fn from_live(profiles: Vec<ProfileRef>) -> Self {
        Self::captured(profiles, SnapshotSource::Live)
    }

    /// Placeholder when neither cache nor live data could be obtained.
    #[must_use]
    pub fn unavailable(advisory: impl Into<String>) -> Self {
        Self {
            profiles: Vec::new(),
            source: SnapshotSource::None,
            captured_at: Utc::now(),
            advisory: Some(advisory.into()),
        }
    }

    fn captured(profiles: Vec<ProfileRef>, source: SnapshotSource) -> Self {
        Self {
            profiles,
            source,
            captured_at: Utc::now(),
            advisory: None,
        }
    }

    /// True if the snapshot carries real data (cache or live).
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.source != SnapshotSource::None
    }

    /// Profile keys, sorted and deduplicated.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        self.profiles.iter().map(ProfileRef::key).collect()
    }

    /// Deterministic digest of the normalized profile/VIP set.
    #[must_use]
    pub fn digest(&self) -> String {
        SnapshotHasher::new().hash_profiles(&self.profiles)
    }
}
