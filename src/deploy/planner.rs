//! Non-mutating deployment planning.
//!
//! A plan is always a dry run against the backend. It names the object that
//! will be created, the chain that will be attached and the profiles that will
//! be repointed. A plan is never executed itself.

use chrono::{Datelike, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::gateway::{ApplianceGateway, DeploymentRequest, RemotePlan};
use crate::impact::{ImpactSnapshot, normalize_key};
use crate::retry::RetryPolicy;

use super::types::{
    CertificateAttributes, CertificateInput, DeploymentParams, DeploymentPlan,
    ValidatedCertificate,
};

/// Builds deployment plans.
pub struct DeploymentPlanner {
    gateway: Arc<dyn ApplianceGateway>,
    retry: RetryPolicy,
    timeout_secs: u64,
}

impl DeploymentPlanner {
    /// Creates a planner over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ApplianceGateway>, retry: RetryPolicy, timeout_secs: u64) -> Self {
        Self {
            gateway,
            retry,
            timeout_secs,
        }
    }

    /// Builds a plan from deployment parameters and the snapshot the operator
    /// last saw.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::NotValidated`] when the certificate has not
    /// been validated, and [`DeployError::PlanFailed`] with the backend's
    /// message when the dry run is refused or the device is unreachable.
    pub async fn plan(
        &self,
        params: &DeploymentParams,
        validated: Option<&ValidatedCertificate>,
        snapshot: &ImpactSnapshot,
    ) -> Result<DeploymentPlan> {
        if !validated.is_some_and(ValidatedCertificate::is_validated) {
            return Err(DeployError::NotValidated.into());
        }

        let request = build_request(params, true, self.timeout_secs);
        debug!(
            "Requesting dry-run plan for {} ({} material)",
            params.device,
            request.material.mode()
        );

        let remote = self
            .retry
            .run("plan", || self.gateway.plan(&request))
            .await
            .map_err(|e| DeployError::PlanFailed {
                device: params.device.hostname.clone(),
                message: e.to_string(),
            })?;

        let object_name = resolve_object_name(params, validated.map(|v| &v.attributes), &remote)
            .ok_or_else(|| DeployError::PlanFailed {
                device: params.device.hostname.clone(),
                message: String::from(
                    "Cannot derive the new object name; set it explicitly",
                ),
            })?;

        let profiles_detected: Vec<String> = snapshot.keys().into_iter().collect();
        let profiles_to_update = profiles_to_update(params, snapshot);

        let actions = if remote.actions.is_empty() {
            local_actions(params, &object_name, &profiles_to_update)
        } else {
            remote.actions.clone()
        };

        info!(
            "Plan for {}: create '{}', update {} profile(s)",
            params.device,
            object_name,
            profiles_to_update.len()
        );

        Ok(DeploymentPlan {
            device: params.device.clone(),
            old_cert_name: params.old_cert_name.clone(),
            mode: params.certificate.mode().to_string(),
            derived_new_object_name: object_name,
            chain_name: remote
                .chain_name
                .clone()
                .unwrap_or_else(|| params.options.chain_name.clone()),
            actions,
            profiles_detected,
            profiles_to_update,
            snapshot: snapshot.clone(),
            created_at: Utc::now(),
        })
    }
}

/// Builds the wire request shared by plan and execute.
pub(crate) fn build_request(
    params: &DeploymentParams,
    dry_run: bool,
    timeout_secs: u64,
) -> DeploymentRequest {
    DeploymentRequest {
        device_id: params.device.id,
        old_cert_name: params.old_cert_name.clone().unwrap_or_default(),
        material: params.certificate.to_payload(),
        new_object_name: params.options.new_object_name.clone(),
        chain_name: params.options.chain_name.clone(),
        install_chain_from_pfx: params.options.install_chain_from_pfx,
        update_profiles: params.options.update_profiles,
        selected_profiles: params
            .selected_profiles
            .as_ref()
            .map(|sel| sel.iter().map(|k| normalize_key(k)).collect()),
        partition: params.options.partition.clone(),
        dry_run,
        timeout_seconds: timeout_secs,
    }
}

/// Derives an object name from the common name and expiry year:
/// `*.` becomes `star_`, `.` and any other character outside
/// `[A-Za-z0-9_-]` become `_`, then `_<year>` is appended.
#[must_use]
pub fn derive_object_name(common_name: &str, expiry_year: i32) -> String {
    let base = common_name.trim().replace("*.", "star_");
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{sanitized}_{expiry_year}")
}

fn resolve_object_name(
    params: &DeploymentParams,
    attributes: Option<&CertificateAttributes>,
    remote: &RemotePlan,
) -> Option<String> {
    if let Some(name) = params
        .options
        .new_object_name
        .as_ref()
        .filter(|n| !n.trim().is_empty())
    {
        return Some(name.trim().to_string());
    }

    if let CertificateInput::Reference { object_name } = &params.certificate {
        return Some(object_name.clone());
    }

    let derived = attributes.and_then(|a| {
        let cn = a.common_name.as_deref()?;
        let year = a.not_after?.year();
        Some(derive_object_name(cn, year))
    });

    derived.or_else(|| {
        remote
            .derived_new_object
            .clone()
            .filter(|n| !n.trim().is_empty())
    })
}

fn profiles_to_update(params: &DeploymentParams, snapshot: &ImpactSnapshot) -> Vec<String> {
    if !params.options.update_profiles {
        return Vec::new();
    }

    let known = snapshot.keys();
    let Some(selection) = &params.selected_profiles else {
        return known.into_iter().collect();
    };

    let selected: BTreeSet<String> = selection.iter().map(|k| normalize_key(k)).collect();
    if !snapshot.is_available() {
        warn!("No impact data to check the profile selection against; using it as given");
        return selected.into_iter().collect();
    }

    for unknown in selected.difference(&known) {
        warn!("Selected profile {unknown} does not reference the certificate; ignoring it");
    }
    selected.intersection(&known).cloned().collect()
}

fn local_actions(params: &DeploymentParams, object_name: &str, profiles: &[String]) -> Vec<String> {
    let install = match &params.certificate {
        CertificateInput::Reference { object_name } => {
            format!("use installed certificate '{object_name}'")
        }
        CertificateInput::Material(material) => format!(
            "upload+install cert/key from {} as '{object_name}'",
            material.mode().to_uppercase()
        ),
    };
    let update = if profiles.is_empty() {
        String::from("no profile updates")
    } else {
        format!("update selected profiles: {}", profiles.join(", "))
    };
    vec![install, update]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::types::ChainOptions;
    use crate::gateway::{CertificateMaterial, DeviceRef, MockApplianceGateway};
    use crate::impact::ProfileRef;
    use chrono::TimeZone;

    fn params(selected: Option<Vec<&str>>) -> DeploymentParams {
        DeploymentParams {
            device: DeviceRef::new(7, "bigip-01.example.net", "10.0.0.7"),
            old_cert_name: Some(String::from("www_example_com_2025")),
            certificate: CertificateInput::Material(CertificateMaterial::Pfx {
                data: vec![1, 2, 3],
                password: None,
            }),
            options: ChainOptions::default(),
            selected_profiles: selected.map(|s| s.into_iter().map(String::from).collect()),
        }
    }

    fn validated() -> ValidatedCertificate {
        ValidatedCertificate::accepted(
            CertificateAttributes {
                common_name: Some(String::from("www.example.com")),
                san: vec![String::from("www.example.com")],
                not_after: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            },
            Vec::new(),
        )
    }

    fn snapshot() -> ImpactSnapshot {
        ImpactSnapshot::from_cache(vec![
            ProfileRef::new("Common", "app-clientssl", &["vs_app_443"]),
            ProfileRef::new("Common", "api-clientssl", &[]),
        ])
    }

    fn planning_gateway() -> Arc<MockApplianceGateway> {
        let mut mock = MockApplianceGateway::new();
        mock.expect_plan().returning(|request| {
            assert!(request.dry_run, "plans must be dry runs");
            Ok(RemotePlan::default())
        });
        Arc::new(mock)
    }

    #[test]
    fn test_derive_object_name() {
        assert_eq!(derive_object_name("www.example.com", 2026), "www_example_com_2026");
        assert_eq!(derive_object_name("*.example.com", 2027), "star_example_com_2027");
        assert_eq!(derive_object_name("api-v2.example.com", 2026), "api-v2_example_com_2026");
        assert_eq!(derive_object_name("weird name/€.com", 2026), "weird_name___com_2026");
    }

    #[tokio::test]
    async fn test_plan_derives_name_and_profiles() {
        let planner = DeploymentPlanner::new(planning_gateway(), RetryPolicy::default(), 45);
        let plan = planner
            .plan(&params(None), Some(&validated()), &snapshot())
            .await
            .expect("plan succeeds");

        assert_eq!(plan.derived_new_object_name, "www_example_com_2026");
        assert_eq!(
            plan.profiles_to_update,
            vec!["Common/api-clientssl", "Common/app-clientssl"]
        );
        assert_eq!(plan.actions.len(), 2);
        assert!(plan.actions[0].starts_with("upload+install cert/key from PFX"));
    }

    #[tokio::test]
    async fn test_selection_filters_profiles() {
        let planner = DeploymentPlanner::new(planning_gateway(), RetryPolicy::default(), 45);
        let plan = planner
            .plan(
                &params(Some(vec!["/Common/app-clientssl", "Common/unrelated"])),
                Some(&validated()),
                &snapshot(),
            )
            .await
            .expect("plan succeeds");

        assert_eq!(plan.profiles_to_update, vec!["Common/app-clientssl"]);
        assert_eq!(plan.profiles_detected.len(), 2);
    }

    #[tokio::test]
    async fn test_profile_updates_disabled() {
        let planner = DeploymentPlanner::new(planning_gateway(), RetryPolicy::default(), 45);
        let mut params = params(Some(vec!["Common/app-clientssl"]));
        params.options.update_profiles = false;

        let plan = planner
            .plan(&params, Some(&validated()), &snapshot())
            .await
            .expect("plan succeeds");

        assert!(plan.profiles_to_update.is_empty());
        assert_eq!(plan.actions[1], "no profile updates");
    }

    #[tokio::test]
    async fn test_unvalidated_material_is_refused() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_plan().times(0);
        let planner = DeploymentPlanner::new(Arc::new(mock), RetryPolicy::default(), 45);

        let unvalidated = ValidatedCertificate::unvalidated(CertificateAttributes::default());
        let err = planner
            .plan(&params(None), Some(&unvalidated), &snapshot())
            .await
            .expect_err("refused");
        assert!(matches!(err, crate::error::CertflowError::Deploy(DeployError::NotValidated)));
    }

    #[tokio::test]
    async fn test_backend_refusal_is_surfaced() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_plan().times(1).returning(|_| {
            Err(crate::error::GatewayError::Rejected {
                status: 400,
                detail: String::from("Device credentials not set"),
            }
            .into())
        });
        let planner = DeploymentPlanner::new(Arc::new(mock), RetryPolicy::default(), 45);

        let err = planner
            .plan(&params(None), Some(&validated()), &snapshot())
            .await
            .expect_err("refused");
        assert!(err.to_string().contains("Device credentials not set"));
    }
}
