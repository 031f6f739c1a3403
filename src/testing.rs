//! Scripted in-memory gateway shared by unit tests.
//!
//! `mockall` covers call-count expectations. This fake covers the cases a
//! synchronous mock cannot express: replies that take time, hang, or change
//! from one call to the next.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{DeployError, GatewayError, Result};
use crate::gateway::{
    ApplianceGateway, DeploymentRequest, ExecutionOutcome, LiveProbeRequest, MaterialPayload,
    ParsedAttributes, RemotePlan, ValidateResponse, VerificationResult,
};
use crate::impact::ProfileRef;

/// One scripted usage reply.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Profiles(Vec<ProfileRef>),
    Delayed(Duration, Vec<ProfileRef>),
    NotFound,
    Transient,
    Hang,
}

impl Reply {
    async fn into_result(self) -> Result<Vec<ProfileRef>> {
        match self {
            Self::Profiles(profiles) => Ok(profiles),
            Self::Delayed(delay, profiles) => {
                tokio::time::sleep(delay).await;
                Ok(profiles)
            }
            Self::NotFound => Err(GatewayError::NotFound {
                resource: String::from("No cached data for this cert/device"),
            }
            .into()),
            Self::Transient => Err(GatewayError::api_error(503, "appliance busy").into()),
            Self::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GatewayError::network("hung").into())
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeGateway {
    cache_script: Mutex<VecDeque<Reply>>,
    live_script: Mutex<VecDeque<Reply>>,
    rejection: Mutex<Option<String>>,
    execute_failure: Mutex<Option<String>>,
    updated_override: Mutex<Option<Vec<String>>>,
    verify_failures: AtomicUsize,
    rescan_fails: AtomicBool,
    last_plan: Mutex<Option<DeploymentRequest>>,
    last_execute: Mutex<Option<DeploymentRequest>>,
    cache_calls: AtomicUsize,
    live_calls: AtomicUsize,
    validate_calls: AtomicUsize,
    plan_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    rescan_calls: AtomicUsize,
}

/// Fingerprint the fake reports for every verified object.
pub(crate) const FAKE_FINGERPRINT: &str = "3F:A1:00:9C:5E:77:12:BB";

impl FakeGateway {
    pub(crate) fn script_cache(&self, replies: impl IntoIterator<Item = Reply>) {
        self.cache_script.lock().unwrap().extend(replies);
    }

    pub(crate) fn script_live(&self, replies: impl IntoIterator<Item = Reply>) {
        self.live_script.lock().unwrap().extend(replies);
    }

    pub(crate) fn reject_material(&self, detail: &str) {
        *self.rejection.lock().unwrap() = Some(detail.to_string());
    }

    pub(crate) fn fail_execute(&self, detail: &str) {
        *self.execute_failure.lock().unwrap() = Some(detail.to_string());
    }

    pub(crate) fn report_updated(&self, profiles: &[&str]) {
        *self.updated_override.lock().unwrap() =
            Some(profiles.iter().map(ToString::to_string).collect());
    }

    pub(crate) fn fail_verify_times(&self, times: usize) {
        self.verify_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn fail_rescan(&self) {
        self.rescan_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn last_plan(&self) -> Option<DeploymentRequest> {
        self.last_plan.lock().unwrap().clone()
    }

    pub(crate) fn last_execute(&self) -> Option<DeploymentRequest> {
        self.last_execute.lock().unwrap().clone()
    }

    pub(crate) fn cache_calls(&self) -> usize {
        self.cache_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn live_calls(&self) -> usize {
        self.live_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn rescan_calls(&self) -> usize {
        self.rescan_calls.load(Ordering::SeqCst)
    }
}

fn next_reply(script: &Mutex<VecDeque<Reply>>) -> Reply {
    script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Reply::Profiles(Vec::new()))
}

#[async_trait]
impl ApplianceGateway for FakeGateway {
    async fn validate_material(&self, material: &MaterialPayload) -> Result<ValidateResponse> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(detail) = self.rejection.lock().unwrap().clone() {
            return Err(GatewayError::Rejected { status: 400, detail }.into());
        }
        let warnings = match material {
            MaterialPayload::Pem { .. } => vec![String::from("Certificate has no SAN extension.")],
            _ => Vec::new(),
        };
        let san = match material {
            MaterialPayload::Pem { .. } => Vec::new(),
            _ => vec![String::from("www.example.com")],
        };
        Ok(ValidateResponse {
            parsed: ParsedAttributes {
                cn: Some(String::from("www.example.com")),
                san,
                not_after: Some(String::from("2026-01-01T00:00:00")),
            },
            warnings,
        })
    }

    async fn cached_usage(&self, _device_id: u64, _cert_name: &str) -> Result<Vec<ProfileRef>> {
        self.cache_calls.fetch_add(1, Ordering::SeqCst);
        next_reply(&self.cache_script).into_result().await
    }

    async fn live_usage(&self, _request: &LiveProbeRequest) -> Result<Vec<ProfileRef>> {
        self.live_calls.fetch_add(1, Ordering::SeqCst);
        next_reply(&self.live_script).into_result().await
    }

    async fn plan(&self, request: &DeploymentRequest) -> Result<RemotePlan> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_plan.lock().unwrap() = Some(request.clone());
        Ok(RemotePlan {
            device: Some(String::from("bigip-01.example.net")),
            derived_new_object: Some(String::from("www_example_com_2026")),
            chain_name: Some(request.chain_name.clone()),
            actions: vec![
                format!("upload+install cert/key from {}", request.material.mode().to_uppercase()),
                String::from("update selected profiles"),
            ],
        })
    }

    async fn execute(&self, request: &DeploymentRequest) -> Result<ExecutionOutcome> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_execute.lock().unwrap() = Some(request.clone());
        if let Some(detail) = self.execute_failure.lock().unwrap().clone() {
            return Err(GatewayError::Rejected { status: 500, detail }.into());
        }
        let updated = self
            .updated_override
            .lock()
            .unwrap()
            .clone()
            .or_else(|| request.selected_profiles.clone())
            .unwrap_or_default();
        Ok(ExecutionOutcome {
            new_cert_object: request
                .new_object_name
                .clone()
                .unwrap_or_else(|| String::from("www_example_com_2026")),
            updated_profiles: updated,
        })
    }

    async fn verify(&self, _device_id: u64, object_name: &str) -> Result<VerificationResult> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.verify_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.verify_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::network("verify connection reset").into());
        }
        if object_name.is_empty() {
            return Err(DeployError::MissingInput {
                what: String::from("object name"),
            }
            .into());
        }
        Ok(VerificationResult {
            subject: String::from("CN=www.example.com"),
            san: vec![String::from("www.example.com")],
            fingerprint_sha256: String::from(FAKE_FINGERPRINT),
            version: Some(3),
        })
    }

    async fn rescan(&self, _device_id: u64, _fast: bool) -> Result<()> {
        self.rescan_calls.fetch_add(1, Ordering::SeqCst);
        if self.rescan_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::api_error(502, "cache refresh failed").into());
        }
        Ok(())
    }
}
