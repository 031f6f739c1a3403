//! Certificate validation.
//!
//! Uploaded material goes through the backend's validation endpoint. An object
//! already installed on the device is validated by reading it back.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CertflowError, DeployError, GatewayError, Result};
use crate::gateway::{
    ApplianceGateway, CertificateMaterial, DeviceRef, ParsedAttributes, VerificationResult,
};
use crate::retry::RetryPolicy;

use super::types::{CertificateAttributes, ValidatedCertificate};

/// Days before expiry at which a warning is added.
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Validates certificate material.
pub struct CertificateValidator {
    gateway: Arc<dyn ApplianceGateway>,
    retry: RetryPolicy,
}

impl CertificateValidator {
    /// Creates a validator over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ApplianceGateway>, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    /// Submits material for validation.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MaterialRejected`] with the backend's detail
    /// when the material is refused. Transient failures surface after the
    /// retry budget is spent.
    pub async fn validate(&self, material: &CertificateMaterial) -> Result<ValidatedCertificate> {
        let payload = material.to_payload();
        let response = self
            .retry
            .run("validate", || self.gateway.validate_material(&payload))
            .await
            .map_err(|e| match e {
                CertflowError::Gateway(GatewayError::Rejected { detail, .. }) => {
                    CertflowError::Deploy(DeployError::MaterialRejected { detail })
                }
                other => other,
            })?;

        let attributes = parse_attributes(&response.parsed);
        let mut warnings = response.warnings;
        warnings.extend(expiry_warnings(&attributes, Utc::now()));

        for warning in &warnings {
            warn!("Validation warning: {warning}");
        }
        info!(
            "Validated {} material: CN={} SAN={} not_after={}",
            material.mode(),
            attributes.common_name.as_deref().unwrap_or("-"),
            attributes.san.len(),
            attributes
                .not_after
                .map_or_else(|| String::from("-"), |d| d.to_rfc3339())
        );

        Ok(ValidatedCertificate::accepted(attributes, warnings))
    }

    /// Validates an object already installed on `device` by reading it back.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MaterialRejected`] when the object does not
    /// exist or has no fingerprint. Other read failures surface after the
    /// retry budget is spent.
    pub async fn validate_reference(
        &self,
        device: &DeviceRef,
        object_name: &str,
    ) -> Result<ValidatedCertificate> {
        let installed = self
            .retry
            .run("validate reference", || self.gateway.verify(device.id, object_name))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    CertflowError::Deploy(DeployError::MaterialRejected {
                        detail: format!("Certificate object '{object_name}' not found on {device}"),
                    })
                } else {
                    e
                }
            })?;

        if installed.fingerprint_sha256.trim().is_empty() {
            return Err(DeployError::MaterialRejected {
                detail: format!("Certificate object '{object_name}' on {device} has no fingerprint"),
            }
            .into());
        }

        let attributes = reference_attributes(&installed);
        info!(
            "Validated installed object '{object_name}' on {device}: CN={} fingerprint={}",
            attributes.common_name.as_deref().unwrap_or("-"),
            installed.fingerprint_sha256
        );
        Ok(ValidatedCertificate::accepted(attributes, Vec::new()))
    }
}

fn reference_attributes(installed: &VerificationResult) -> CertificateAttributes {
    CertificateAttributes {
        common_name: subject_common_name(&installed.subject),
        san: installed.san.clone(),
        not_after: None,
    }
}

/// `CN` component of a distinguished name such as `C=US, CN=www.example.com`.
fn subject_common_name(subject: &str) -> Option<String> {
    subject
        .split([',', '/'])
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("CN"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|cn| !cn.is_empty())
}

fn parse_attributes(parsed: &ParsedAttributes) -> CertificateAttributes {
    CertificateAttributes {
        common_name: parsed.cn.clone().filter(|cn| !cn.trim().is_empty()),
        san: parsed.san.clone(),
        not_after: parsed.not_after.as_deref().and_then(parse_timestamp),
    }
}

/// Parses RFC 3339, offset-less ISO 8601, or a bare date (all as UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn expiry_warnings(attributes: &CertificateAttributes, now: DateTime<Utc>) -> Vec<String> {
    let Some(not_after) = attributes.not_after else {
        return vec![String::from("Certificate expiry could not be determined.")];
    };

    if not_after <= now {
        vec![format!("Certificate expired on {}.", not_after.format("%Y-%m-%d"))]
    } else if (not_after - now).num_days() < EXPIRY_WARNING_DAYS {
        vec![format!(
            "Certificate expires in {} day(s), on {}.",
            (not_after - now).num_days(),
            not_after.format("%Y-%m-%d")
        )]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockApplianceGateway, ValidateResponse};
    use crate::testing::FakeGateway;
    use chrono::TimeZone;

    fn device() -> DeviceRef {
        DeviceRef::new(7, "bigip-01.example.net", "10.0.0.7")
    }

    fn pfx() -> CertificateMaterial {
        CertificateMaterial::Pfx {
            data: vec![1, 2, 3],
            password: Some(String::from("pw")),
        }
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-01T00:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-01T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-01 00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-01"), Some(expected));
        assert_eq!(parse_timestamp("soon"), None);
    }

    #[test]
    fn test_expiry_warnings() {
        let now = Utc.with_ymd_and_hms(2025, 12, 20, 0, 0, 0).unwrap();
        let mut attributes = CertificateAttributes {
            not_after: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            ..CertificateAttributes::default()
        };
        assert!(expiry_warnings(&attributes, now)[0].contains("expires in 12 day(s)"));

        attributes.not_after = Some(Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
        assert!(expiry_warnings(&attributes, now).is_empty());

        attributes.not_after = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(expiry_warnings(&attributes, now)[0].contains("expired"));
    }

    #[tokio::test]
    async fn test_rejection_detail_is_verbatim() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_validate_material().times(1).returning(|_| {
            Err(GatewayError::Rejected {
                status: 400,
                detail: String::from("Could not open PFX. Is the password correct?"),
            }
            .into())
        });

        let err = CertificateValidator::new(Arc::new(mock), RetryPolicy::default())
            .validate(&pfx())
            .await
            .expect_err("rejected");

        assert!(matches!(
            err,
            CertflowError::Deploy(DeployError::MaterialRejected { ref detail })
                if detail == "Could not open PFX. Is the password correct?"
        ));
    }

    #[tokio::test]
    async fn test_accepted_material_carries_warnings() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_validate_material().times(1).returning(|_| {
            Ok(ValidateResponse {
                parsed: ParsedAttributes {
                    cn: Some(String::from("www.example.com")),
                    san: Vec::new(),
                    not_after: Some(String::from("2099-01-01T00:00:00")),
                },
                warnings: vec![String::from("Certificate has no SAN extension.")],
            })
        });

        let validated = CertificateValidator::new(Arc::new(mock), RetryPolicy::default())
            .validate(&pfx())
            .await
            .expect("accepted");

        assert!(validated.is_validated());
        assert_eq!(validated.attributes.common_name.as_deref(), Some("www.example.com"));
        assert_eq!(validated.warnings, vec![String::from("Certificate has no SAN extension.")]);
    }

    #[test]
    fn test_subject_common_name() {
        assert_eq!(
            subject_common_name("C=US, O=Example, CN=www.example.com").as_deref(),
            Some("www.example.com")
        );
        assert_eq!(
            subject_common_name("/C=US/cn=api.example.com").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(subject_common_name("O=Example"), None);
    }

    #[tokio::test]
    async fn test_installed_object_is_validated_by_read_back() {
        let fake = Arc::new(FakeGateway::default());

        let validated = CertificateValidator::new(fake.clone(), RetryPolicy::default())
            .validate_reference(&device(), "www_example_com_2026")
            .await
            .expect("installed object accepted");

        assert!(validated.is_validated());
        assert_eq!(validated.attributes.common_name.as_deref(), Some("www.example.com"));
        assert_eq!(fake.verify_calls(), 1);
        assert_eq!(fake.validate_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_object_is_rejected() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_verify().times(1).returning(|_, _| {
            Err(GatewayError::NotFound {
                resource: String::from("Certificate object not found"),
            }
            .into())
        });

        let err = CertificateValidator::new(Arc::new(mock), RetryPolicy::default())
            .validate_reference(&device(), "no_such_cert")
            .await
            .expect_err("rejected");

        assert!(matches!(
            err,
            CertflowError::Deploy(DeployError::MaterialRejected { ref detail })
                if detail.contains("'no_such_cert' not found")
        ));
    }
}
