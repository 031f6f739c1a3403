//! Remote procedure boundary to the certificate management backend.
//!
//! Everything the engine needs from the outside world goes through
//! [`ApplianceGateway`]: material validation, cached and live usage lookups,
//! plan, execute, read-back and cache refresh. [`ApplianceClient`] is the
//! HTTP implementation. Tests substitute their own.

mod client;
mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::impact::ProfileRef;

pub use client::ApplianceClient;
pub use types::{
    CertificateMaterial, DeploymentRequest, DeviceRef, ExecuteResponse, ExecutionOutcome,
    LiveProbeRequest, MaterialPayload, ParsedAttributes, PlanResponse, RemotePlan,
    RescanRequest, UsageResponse, ValidateResponse, VerificationResult,
};

/// Operations offered by the certificate management backend.
///
/// Implementations make exactly one attempt per call. Retrying is the
/// caller's decision and is only ever applied to reads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplianceGateway: Send + Sync {
    /// Parses and checks certificate material.
    async fn validate_material(&self, material: &MaterialPayload) -> Result<ValidateResponse>;

    /// Profiles referencing a certificate on a device, from the inventory cache.
    async fn cached_usage(&self, device_id: u64, cert_name: &str) -> Result<Vec<ProfileRef>>;

    /// Profiles referencing a certificate, queried live on the device.
    async fn live_usage(&self, request: &LiveProbeRequest) -> Result<Vec<ProfileRef>>;

    /// Builds a non-mutating plan.
    async fn plan(&self, request: &DeploymentRequest) -> Result<RemotePlan>;

    /// Performs the deployment. Not idempotent.
    async fn execute(&self, request: &DeploymentRequest) -> Result<ExecutionOutcome>;

    /// Reads back an installed certificate object.
    async fn verify(&self, device_id: u64, object_name: &str) -> Result<VerificationResult>;

    /// Asks the backend to refresh its inventory cache for a device.
    async fn rescan(&self, device_id: u64, fast: bool) -> Result<()>;
}
