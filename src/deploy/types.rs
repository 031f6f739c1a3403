//! Deployment workflow types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DeployDefaults;
use crate::gateway::{CertificateMaterial, DeviceRef, MaterialPayload};
use crate::impact::ImpactSnapshot;

/// Attributes parsed from validated material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAttributes {
    /// Subject common name.
    pub common_name: Option<String>,
    /// Subject alternative names.
    pub san: Vec<String>,
    /// Expiry.
    pub not_after: Option<DateTime<Utc>>,
}

/// A certificate that passed validation: uploaded material accepted by the
/// validation endpoint, or an installed object that was read back.
///
/// Only [`CertificateValidator`](super::CertificateValidator) creates values
/// with `validated == true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedCertificate {
    /// Parsed attributes.
    pub attributes: CertificateAttributes,
    /// Warnings reported during validation.
    pub warnings: Vec<String>,
    validated: bool,
}

impl ValidatedCertificate {
    pub(crate) const fn accepted(attributes: CertificateAttributes, warnings: Vec<String>) -> Self {
        Self {
            attributes,
            warnings,
            validated: true,
        }
    }

    /// Attributes that have not been through validation.
    #[must_use]
    pub const fn unvalidated(attributes: CertificateAttributes) -> Self {
        Self {
            attributes,
            warnings: Vec::new(),
            validated: false,
        }
    }

    /// True once validation accepted the certificate.
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        self.validated
    }
}

/// What is being deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateInput {
    /// Freshly uploaded material.
    Material(CertificateMaterial),
    /// An object already installed on the device. Validated by read-back.
    Reference {
        /// Installed object name.
        object_name: String,
    },
}

impl CertificateInput {
    /// Wire payload.
    #[must_use]
    pub fn to_payload(&self) -> MaterialPayload {
        match self {
            Self::Material(material) => material.to_payload(),
            Self::Reference { object_name } => MaterialPayload::Reference {
                object_name: object_name.clone(),
            },
        }
    }

    /// Mode name as used on the wire.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Material(material) => material.mode(),
            Self::Reference { .. } => "reference",
        }
    }
}

/// Chain and profile options for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOptions {
    /// Chain certificate name.
    pub chain_name: String,
    /// Install the chain embedded in PFX material.
    pub install_chain_from_pfx: bool,
    /// Repoint affected profiles.
    pub update_profiles: bool,
    /// Partition for created objects.
    pub partition: String,
    /// Explicit name for the new object. Derived when absent.
    pub new_object_name: Option<String>,
}

impl From<&DeployDefaults> for ChainOptions {
    fn from(defaults: &DeployDefaults) -> Self {
        Self {
            chain_name: defaults.chain_name.clone(),
            install_chain_from_pfx: defaults.install_chain_from_pfx,
            update_profiles: defaults.update_profiles,
            partition: defaults.partition.clone(),
            new_object_name: None,
        }
    }
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self::from(&DeployDefaults::default())
    }
}

/// Parameters shared by plan and execute. The executor receives the same
/// parameters the plan was built from and the backend re-derives state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentParams {
    /// Target device.
    pub device: DeviceRef,
    /// Certificate being replaced.
    pub old_cert_name: Option<String>,
    /// Certificate being deployed.
    pub certificate: CertificateInput,
    /// Chain and profile options.
    pub options: ChainOptions,
    /// Operator's profile selection, in any key form.
    pub selected_profiles: Option<Vec<String>>,
}

/// Read-only description of what an execute would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    /// Target device.
    pub device: DeviceRef,
    /// Certificate being replaced.
    pub old_cert_name: Option<String>,
    /// Material mode.
    pub mode: String,
    /// Name the new certificate object will get.
    pub derived_new_object_name: String,
    /// Chain certificate name.
    pub chain_name: String,
    /// Human-readable actions.
    pub actions: Vec<String>,
    /// Profiles that reference the old certificate.
    pub profiles_detected: Vec<String>,
    /// Profiles an execute will repoint.
    pub profiles_to_update: Vec<String>,
    /// Snapshot the plan was built from.
    pub snapshot: ImpactSnapshot,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a successful execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentResult {
    /// Created certificate object.
    pub new_cert_object_name: String,
    /// Profiles actually repointed.
    pub updated_profiles: Vec<String>,
    /// Planned profiles the backend did not report as updated.
    pub missing_profiles: Vec<String>,
}

impl DeploymentResult {
    /// True if the backend updated fewer profiles than planned.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.missing_profiles.is_empty()
    }
}
