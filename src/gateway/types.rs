//! Wire types for the certificate management API.
//!
//! Validate, preview, plan and execute are form endpoints: every field is a
//! multipart text field and PFX bytes travel as the `pfx_file` upload.

use serde::{Deserialize, Serialize};

use crate::impact::ProfileRef;

/// A managed appliance. Immutable for the duration of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    /// Inventory identifier.
    pub id: u64,
    /// Hostname as registered in inventory.
    pub hostname: String,
    /// Management address.
    #[serde(default)]
    pub address: String,
}

impl DeviceRef {
    /// Creates a device reference.
    #[must_use]
    pub fn new(id: u64, hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            address: address.into(),
        }
    }
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{})", self.hostname, self.id)
    }
}

/// Certificate material as uploaded by the operator.
#[derive(Clone, PartialEq, Eq)]
pub enum CertificateMaterial {
    /// PKCS#12 bundle.
    Pfx {
        /// Raw PFX bytes.
        data: Vec<u8>,
        /// Bundle password.
        password: Option<String>,
    },
    /// PEM certificate and private key.
    Pem {
        /// Certificate PEM.
        cert_pem: String,
        /// Private key PEM.
        key_pem: String,
        /// Optional intermediate chain PEM.
        chain_pem: Option<String>,
    },
}

impl CertificateMaterial {
    /// Material mode name as used on the wire.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Pfx { .. } => "pfx",
            Self::Pem { .. } => "pem",
        }
    }

    /// Wire payload for this material.
    #[must_use]
    pub fn to_payload(&self) -> MaterialPayload {
        match self {
            Self::Pfx { data, password } => MaterialPayload::Pfx {
                data: data.clone(),
                pfx_password: password.clone(),
            },
            Self::Pem {
                cert_pem,
                key_pem,
                chain_pem,
            } => MaterialPayload::Pem {
                cert_pem: cert_pem.clone(),
                key_pem: key_pem.clone(),
                chain_pem: chain_pem.clone(),
            },
        }
    }
}

// Keys and passwords never reach logs.
impl std::fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pfx { data, password } => f
                .debug_struct("Pfx")
                .field("bytes", &data.len())
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
            Self::Pem { chain_pem, .. } => f
                .debug_struct("Pem")
                .field("key_pem", &"<redacted>")
                .field("has_chain", &chain_pem.is_some())
                .finish(),
        }
    }
}

/// Material as sent to the backend, discriminated by `mode`.
#[derive(Clone, PartialEq, Eq)]
pub enum MaterialPayload {
    /// PFX upload.
    Pfx {
        /// PFX bytes, sent as the `pfx_file` part.
        data: Vec<u8>,
        /// Bundle password.
        pfx_password: Option<String>,
    },
    /// PEM pair.
    Pem {
        /// Certificate PEM.
        cert_pem: String,
        /// Private key PEM.
        key_pem: String,
        /// Optional chain PEM.
        chain_pem: Option<String>,
    },
    /// An object already installed on the device.
    Reference {
        /// Installed certificate object name.
        object_name: String,
    },
}

impl MaterialPayload {
    /// Mode name as used on the wire.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Pfx { .. } => "pfx",
            Self::Pem { .. } => "pem",
            Self::Reference { .. } => "reference",
        }
    }

    /// Text form fields, `mode` first. Absent optionals are left out.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("mode", self.mode().to_string())];
        match self {
            Self::Pfx { pfx_password, .. } => {
                if let Some(password) = pfx_password {
                    fields.push(("pfx_password", password.clone()));
                }
            }
            Self::Pem {
                cert_pem,
                key_pem,
                chain_pem,
            } => {
                fields.push(("cert_pem", cert_pem.clone()));
                fields.push(("key_pem", key_pem.clone()));
                if let Some(chain) = chain_pem {
                    fields.push(("chain_pem", chain.clone()));
                }
            }
            Self::Reference { object_name } => fields.push(("object_name", object_name.clone())),
        }
        fields
    }

    /// Bytes for the `pfx_file` upload.
    #[must_use]
    pub fn pfx_file(&self) -> Option<&[u8]> {
        match self {
            Self::Pfx { data, .. } => Some(data.as_slice()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for MaterialPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference { object_name } => f
                .debug_struct("Reference")
                .field("object_name", object_name)
                .finish(),
            other => write!(f, "MaterialPayload({})", other.mode()),
        }
    }
}

/// Parsed attributes returned by the validation endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAttributes {
    /// Subject common name.
    #[serde(default)]
    pub cn: Option<String>,
    /// Subject alternative names (DNS and IP).
    #[serde(default)]
    pub san: Vec<String>,
    /// Expiry as an ISO 8601 string. Offsets are optional.
    #[serde(default)]
    pub not_after: Option<String>,
}

/// Response of `POST /deployments/validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Parsed attributes.
    #[serde(default)]
    pub parsed: ParsedAttributes,
    /// Non-fatal findings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Response of the cached and live impact endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageResponse {
    /// Profiles referencing the certificate.
    #[serde(default)]
    pub profiles: Vec<ProfileRef>,
}

/// Form of `POST /deployments/preview`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveProbeRequest {
    /// Target device.
    pub device_id: u64,
    /// Certificate currently installed.
    pub old_cert_name: String,
    /// Partition to search.
    pub partition: String,
    /// Server-side deadline.
    pub timeout_seconds: u64,
}

impl LiveProbeRequest {
    /// Text form fields.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("device_id", self.device_id.to_string()),
            ("old_cert_name", self.old_cert_name.clone()),
            ("partition", self.partition.clone()),
            ("timeout_seconds", self.timeout_seconds.to_string()),
        ]
    }
}

/// Form of the plan and execute endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    /// Target device.
    pub device_id: u64,
    /// Certificate being replaced. Empty for a fresh install.
    pub old_cert_name: String,
    /// Material, sent with its `mode` field.
    pub material: MaterialPayload,
    /// Explicit object name, when not derived server-side.
    pub new_object_name: Option<String>,
    /// Chain certificate name.
    pub chain_name: String,
    /// Install the chain embedded in the PFX.
    pub install_chain_from_pfx: bool,
    /// Repoint profiles to the new certificate.
    pub update_profiles: bool,
    /// Restrict updates to these profile keys.
    pub selected_profiles: Option<Vec<String>>,
    /// Partition for new objects.
    pub partition: String,
    /// Plan only.
    pub dry_run: bool,
    /// Server-side deadline.
    pub timeout_seconds: u64,
}

impl DeploymentRequest {
    /// Text form fields. `selected_profiles` travels as a JSON array string.
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("device_id", self.device_id.to_string()),
            ("old_cert_name", self.old_cert_name.clone()),
        ];
        fields.extend(self.material.form_fields());
        if let Some(name) = &self.new_object_name {
            fields.push(("new_object_name", name.clone()));
        }
        fields.push(("chain_name", self.chain_name.clone()));
        fields.push(("install_chain_from_pfx", self.install_chain_from_pfx.to_string()));
        fields.push(("update_profiles", self.update_profiles.to_string()));
        if let Some(profiles) = &self.selected_profiles {
            fields.push((
                "selected_profiles",
                serde_json::Value::from(profiles.clone()).to_string(),
            ));
        }
        fields.push(("partition", self.partition.clone()));
        fields.push(("dry_run", self.dry_run.to_string()));
        fields.push(("timeout_seconds", self.timeout_seconds.to_string()));
        fields
    }
}

/// Plan as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePlan {
    /// Device hostname.
    #[serde(default)]
    pub device: Option<String>,
    /// Object name the backend derived from the material.
    #[serde(default)]
    pub derived_new_object: Option<String>,
    /// Chain name the backend will use.
    #[serde(default)]
    pub chain_name: Option<String>,
    /// Human-readable actions.
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Response of `POST /deployments/plan`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanResponse {
    /// Always true for plans.
    #[serde(default)]
    pub dry_run: bool,
    /// The plan.
    pub plan: RemotePlan,
}

/// Outcome of a mutating execute call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Created certificate object.
    pub new_cert_object: String,
    /// Profiles actually repointed.
    #[serde(default)]
    pub updated_profiles: Vec<String>,
}

/// Response of `POST /deployments/execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    /// False when the call mutated the device.
    #[serde(default)]
    pub dry_run: bool,
    /// Present when `dry_run` is false.
    #[serde(default)]
    pub result: Option<ExecutionOutcome>,
}

/// Installed certificate as read back from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Subject distinguished name.
    #[serde(default)]
    pub subject: String,
    /// Subject alternative names.
    #[serde(default)]
    pub san: Vec<String>,
    /// SHA-256 fingerprint, hex, any case, colons optional.
    #[serde(default)]
    pub fingerprint_sha256: String,
    /// X.509 version.
    #[serde(default)]
    pub version: Option<u32>,
}

impl VerificationResult {
    /// Compares the fingerprint with `expected`, ignoring case and colons.
    #[must_use]
    pub fn matches_fingerprint(&self, expected: &str) -> bool {
        let normalize = |s: &str| -> String {
            s.chars()
                .filter(|c| *c != ':' && !c.is_whitespace())
                .map(|c| c.to_ascii_lowercase())
                .collect()
        };
        let actual = normalize(&self.fingerprint_sha256);
        !actual.is_empty() && actual == normalize(expected)
    }
}

/// Body of `POST /f5/cache/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RescanRequest {
    /// Devices to refresh.
    pub device_ids: Vec<u64>,
    /// Request the lightweight refresh.
    pub fast: bool,
}

/// Error body returned by the backend.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}
