//! Post-deployment read-back.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{DeployError, Result};
use crate::gateway::{ApplianceGateway, DeviceRef, VerificationResult};
use crate::retry::RetryPolicy;

/// Reads back an installed certificate object. Idempotent and repeatable.
/// A failure here never invalidates a deployment.
pub struct VerificationProbe {
    gateway: Arc<dyn ApplianceGateway>,
    retry: RetryPolicy,
}

impl VerificationProbe {
    /// Creates a probe over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ApplianceGateway>, retry: RetryPolicy) -> Self {
        Self { gateway, retry }
    }

    /// Reads back `object_name` from the device.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::VerificationFailed`] when the read-back fails
    /// after retries.
    pub async fn verify(&self, device: &DeviceRef, object_name: &str) -> Result<VerificationResult> {
        let result = self
            .retry
            .run("verify", || self.gateway.verify(device.id, object_name))
            .await
            .map_err(|e| {
                warn!("Verification of '{object_name}' on {device} failed: {e}");
                DeployError::VerificationFailed {
                    object_name: object_name.to_string(),
                    message: e.to_string(),
                }
            })?;

        info!(
            "Verified '{object_name}' on {device}: subject={} fingerprint={}",
            result.subject, result.fingerprint_sha256
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CertflowError;
    use crate::testing::{FAKE_FINGERPRINT, FakeGateway};

    fn device() -> DeviceRef {
        DeviceRef::new(7, "bigip-01.example.net", "10.0.0.7")
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_read_back_is_retried() {
        let fake = Arc::new(FakeGateway::default());
        fake.fail_verify_times(2);

        let result = VerificationProbe::new(fake.clone(), RetryPolicy::default())
            .verify(&device(), "www_example_com_2026")
            .await
            .expect("third attempt succeeds");

        assert_eq!(fake.verify_calls(), 3);
        assert!(result.matches_fingerprint(&FAKE_FINGERPRINT.to_lowercase()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_map_to_verification_error() {
        let fake = Arc::new(FakeGateway::default());
        fake.fail_verify_times(5);

        let err = VerificationProbe::new(fake.clone(), RetryPolicy::default())
            .verify(&device(), "www_example_com_2026")
            .await
            .expect_err("gives up");

        assert!(matches!(
            err,
            CertflowError::Deploy(DeployError::VerificationFailed { .. })
        ));
        assert_eq!(fake.verify_calls(), 3);
    }
}
