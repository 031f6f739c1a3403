//! Mutating deployment against the appliance.
//!
//! One attempt per authorization, never retried. A successful attempt always
//! fires a cache refresh, independent of any later verification.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{DeployError, Result};
use crate::gateway::ApplianceGateway;
use crate::impact::normalize_key;

use super::gate::ExecuteAuthorization;
use super::planner::build_request;
use super::rescan::{RescanHandle, RescanTrigger};
use super::types::{DeploymentParams, DeploymentResult, ValidatedCertificate};

/// Result of an execute call together with its cache refresh.
#[derive(Debug)]
pub struct ExecutionReport {
    /// What the backend did.
    pub result: DeploymentResult,
    /// The refresh fired after success.
    pub rescan: RescanHandle,
}

/// Performs deployments.
pub struct DeploymentExecutor {
    gateway: Arc<dyn ApplianceGateway>,
    rescan: RescanTrigger,
    timeout_secs: u64,
    fast_rescan: bool,
}

impl DeploymentExecutor {
    /// Creates an executor over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ApplianceGateway>, timeout_secs: u64) -> Self {
        Self {
            rescan: RescanTrigger::new(Arc::clone(&gateway)),
            gateway,
            timeout_secs,
            fast_rescan: true,
        }
    }

    /// Sets whether the post-deployment refresh uses the fast path.
    #[must_use]
    pub const fn with_fast_rescan(mut self, fast: bool) -> Self {
        self.fast_rescan = fast;
        self
    }

    /// Executes the deployment described by `params`.
    ///
    /// `planned_profiles` is what the plan promised to update. A backend
    /// report that differs is logged as partial application.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::NotValidated`] if the certificate has not been
    /// validated, whatever its input mode, and [`DeployError::ExecutionFailed`]
    /// if the backend call fails. Nothing is retried.
    pub async fn execute(
        &self,
        params: &DeploymentParams,
        validated: Option<&ValidatedCertificate>,
        planned_profiles: &[String],
        _authorization: ExecuteAuthorization,
    ) -> Result<ExecutionReport> {
        if !validated.is_some_and(ValidatedCertificate::is_validated) {
            return Err(DeployError::NotValidated.into());
        }

        let request = build_request(params, false, self.timeout_secs);
        info!(
            "Executing deployment on {} ({} material, old cert: {})",
            params.device,
            request.material.mode(),
            params.old_cert_name.as_deref().unwrap_or("-")
        );

        let outcome = self.gateway.execute(&request).await.map_err(|e| {
            error!("Deployment to {} failed: {e}", params.device);
            DeployError::ExecutionFailed {
                device: params.device.hostname.clone(),
                message: e.to_string(),
            }
        })?;

        let missing = missing_profiles(planned_profiles, &outcome.updated_profiles);
        if missing.is_empty() {
            info!(
                "Deployed '{}' on {}; {} profile(s) updated",
                outcome.new_cert_object,
                params.device,
                outcome.updated_profiles.len()
            );
        } else {
            warn!(
                "Partial application on {}: planned profile(s) not updated: {}",
                params.device,
                missing.join(", ")
            );
        }

        let rescan = self.rescan.fire(&params.device, self.fast_rescan);

        Ok(ExecutionReport {
            result: DeploymentResult {
                new_cert_object_name: outcome.new_cert_object,
                updated_profiles: outcome.updated_profiles,
                missing_profiles: missing,
            },
            rescan,
        })
    }
}

fn missing_profiles(planned: &[String], updated: &[String]) -> Vec<String> {
    let updated: BTreeSet<String> = updated.iter().map(|k| normalize_key(k)).collect();
    planned
        .iter()
        .map(|k| normalize_key(k))
        .filter(|k| !updated.contains(k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::gate::test_authorization;
    use crate::deploy::types::{CertificateAttributes, CertificateInput, ChainOptions};
    use crate::error::{CertflowError, GatewayError};
    use crate::gateway::{CertificateMaterial, DeviceRef, ExecutionOutcome, MockApplianceGateway};
    use std::time::Duration;

    fn params() -> DeploymentParams {
        DeploymentParams {
            device: DeviceRef::new(7, "bigip-01.example.net", "10.0.0.7"),
            old_cert_name: Some(String::from("www_example_com_2025")),
            certificate: CertificateInput::Material(CertificateMaterial::Pfx {
                data: vec![1, 2, 3],
                password: None,
            }),
            options: ChainOptions::default(),
            selected_profiles: None,
        }
    }

    fn validated() -> ValidatedCertificate {
        ValidatedCertificate::accepted(CertificateAttributes::default(), Vec::new())
    }

    #[tokio::test]
    async fn test_unvalidated_never_reaches_backend() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_execute().times(0);
        mock.expect_rescan().times(0);
        let executor = DeploymentExecutor::new(Arc::new(mock), 60);

        let unvalidated = ValidatedCertificate::unvalidated(CertificateAttributes::default());
        let err = executor
            .execute(&params(), Some(&unvalidated), &[], test_authorization())
            .await
            .expect_err("refused");
        assert!(matches!(err, CertflowError::Deploy(DeployError::NotValidated)));

        let err = executor
            .execute(&params(), None, &[], test_authorization())
            .await
            .expect_err("refused");
        assert!(matches!(err, CertflowError::Deploy(DeployError::NotValidated)));
    }

    #[tokio::test]
    async fn test_unvalidated_reference_is_refused() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_execute().times(0);
        let executor = DeploymentExecutor::new(Arc::new(mock), 60);

        let mut params = params();
        params.certificate = CertificateInput::Reference {
            object_name: String::from("www_example_com_2026"),
        };
        let err = executor
            .execute(&params, None, &[], test_authorization())
            .await
            .expect_err("refused");
        assert!(matches!(err, CertflowError::Deploy(DeployError::NotValidated)));
    }

    #[tokio::test]
    async fn test_success_fires_rescan_once() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_execute()
            .withf(|request| !request.dry_run)
            .times(1)
            .returning(|_| {
                Ok(ExecutionOutcome {
                    new_cert_object: String::from("www_example_com_2026"),
                    updated_profiles: vec![String::from("/Common/app-clientssl")],
                })
            });
        mock.expect_rescan().times(1).returning(|_, _| Ok(()));
        let executor = DeploymentExecutor::new(Arc::new(mock), 60);

        let report = executor
            .execute(
                &params(),
                Some(&validated()),
                &[String::from("Common/app-clientssl")],
                test_authorization(),
            )
            .await
            .expect("deploys");

        assert_eq!(report.result.new_cert_object_name, "www_example_com_2026");
        assert!(!report.result.is_partial());
        assert_eq!(report.rescan.wait(Duration::from_secs(5)).await, Some(true));
    }

    #[tokio::test]
    async fn test_partial_application_is_reported() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(ExecutionOutcome {
                new_cert_object: String::from("www_example_com_2026"),
                updated_profiles: vec![String::from("Common/app-clientssl")],
            })
        });
        mock.expect_rescan().times(1).returning(|_, _| Ok(()));
        let executor = DeploymentExecutor::new(Arc::new(mock), 60);

        let planned = vec![
            String::from("Common/app-clientssl"),
            String::from("Common/api-clientssl"),
        ];
        let report = executor
            .execute(&params(), Some(&validated()), &planned, test_authorization())
            .await
            .expect("deploys");

        assert_eq!(report.result.missing_profiles, vec!["Common/api-clientssl"]);
        report.rescan.wait(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_failure_is_not_retried_and_skips_rescan() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(GatewayError::api_error(503, "appliance busy").into()));
        mock.expect_rescan().times(0);
        let executor = DeploymentExecutor::new(Arc::new(mock), 60);

        let err = executor
            .execute(&params(), Some(&validated()), &[], test_authorization())
            .await
            .expect_err("fails");
        assert!(matches!(err, CertflowError::Deploy(DeployError::ExecutionFailed { .. })));
    }
}
