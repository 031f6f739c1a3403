//! Drift detection between two impact snapshots.
//!
//! The comparison is a pure function over profile keys (`partition/name`) and
//! per-profile VIP name sets. It runs once per execute attempt: the snapshot the
//! plan was built from on one side, a fresh live snapshot on the other.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::types::ProfileRef;

/// VIP membership change for a profile present on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VipChange {
    /// Profile key.
    pub key: String,
    /// VIPs attached since the earlier snapshot.
    pub added: Vec<String>,
    /// VIPs detached since the earlier snapshot.
    pub removed: Vec<String>,
}

/// Additive/subtractive diff between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Profiles present live but not in the earlier snapshot.
    pub added: Vec<String>,
    /// Profiles present in the earlier snapshot but gone live.
    pub removed: Vec<String>,
    /// Profiles on both sides whose VIP sets differ.
    pub vip_changed: Vec<VipChange>,
}

/// Pure snapshot comparator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriftDetector;

impl DriftDetector {
    /// Compares the earlier (`cached`) profile set with the current (`live`)
    /// one. All output lists are sorted.
    #[must_use]
    pub fn diff(cached: &[ProfileRef], live: &[ProfileRef]) -> DriftReport {
        let before = normalize(cached);
        let after = normalize(live);

        let added = after
            .keys()
            .filter(|k| !before.contains_key(*k))
            .cloned()
            .collect();
        let removed = before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect();

        let vip_changed = before
            .iter()
            .filter_map(|(key, old_vips)| {
                let new_vips = after.get(key)?;
                let added: Vec<String> = new_vips.difference(old_vips).cloned().collect();
                let removed: Vec<String> = old_vips.difference(new_vips).cloned().collect();
                if added.is_empty() && removed.is_empty() {
                    None
                } else {
                    Some(VipChange {
                        key: key.clone(),
                        added,
                        removed,
                    })
                }
            })
            .collect();

        DriftReport {
            added,
            removed,
            vip_changed,
        }
    }
}

/// Collapses a profile list into `key -> VIP names`. Duplicate keys are
/// merged by VIP union.
pub(crate) fn normalize(profiles: &[ProfileRef]) -> BTreeMap<String, BTreeSet<String>> {
    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for profile in profiles {
        map.entry(profile.key())
            .or_default()
            .extend(profile.vips.iter().map(|v| v.name.clone()));
    }
    map
}

impl DriftReport {
    /// Returns true if anything differs.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.change_count() > 0
    }

    /// Number of changed entries across all three lists.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.vip_changed.len()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_drift() {
            return write!(f, "no drift");
        }

        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("new profiles: {}", self.added.join(", ")));
        }
        if !self.removed.is_empty() {
            parts.push(format!("removed profiles: {}", self.removed.join(", ")));
        }
        for change in &self.vip_changed {
            let mut part = change.key.clone();
            if !change.added.is_empty() {
                part.push_str(&format!(" +[{}]", change.added.join(", ")));
            }
            if !change.removed.is_empty() {
                part.push_str(&format!(" -[{}]", change.removed.join(", ")));
            }
            parts.push(part);
        }
        write!(f, "{}", parts.join("; "))
    }
}
