//! Impact analysis: which profiles reference a certificate, and whether that
//! set has drifted since it was last observed.

mod drift;
mod hash;
mod resolver;
mod types;

pub use drift::{DriftDetector, DriftReport, VipChange};
pub use hash::SnapshotHasher;
pub use resolver::{DEFAULT_LIVE_TIMEOUT, ImpactPreviewResolver, ImpactQuery, ResolveOutcome};
pub use types::{ImpactSnapshot, ProfileRef, SnapshotSource, VipRef, normalize_key, profile_key};
