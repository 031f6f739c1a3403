//! HTTP client for the certificate management backend.
//!
//! One request per call. Non-2xx responses are mapped onto [`GatewayError`]
//! with the backend's `detail` string carried through unchanged.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::error::{CertflowError, GatewayError, Result};
use crate::impact::ProfileRef;

use super::ApplianceGateway;
use super::types::{
    DeploymentRequest, ErrorBody, ExecuteResponse, ExecutionOutcome, LiveProbeRequest,
    MaterialPayload, PlanResponse, RemotePlan, RescanRequest, UsageResponse, ValidateResponse,
    VerificationResult,
};

/// API path prefix.
const API_PREFIX: &str = "/api/v1";

/// Slack added to server-side deadlines so the server can answer first.
const DEADLINE_SLACK_SECS: u64 = 5;

/// File name given to PFX uploads.
const PFX_FILE_NAME: &str = "certificate.pfx";

/// Certificate management API client.
#[derive(Debug, Clone)]
pub struct ApplianceClient {
    /// HTTP client.
    client: Client,
    /// Backend base URL, without trailing slash.
    base_url: String,
    /// Bearer token.
    token: Option<String>,
    /// Standard read deadline.
    request_timeout: Duration,
    /// Plan deadline.
    plan_timeout: Duration,
    /// Execute deadline.
    execute_timeout: Duration,
}

impl ApplianceClient {
    /// Creates a client for the given backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("certflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            request_timeout: Duration::from_secs(30),
            plan_timeout: Duration::from_secs(45),
            execute_timeout: Duration::from_secs(60),
        })
    }

    /// Creates a client from engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &EngineConfig, token: Option<String>) -> Result<Self> {
        let mut client = Self::new(&config.api.base_url, token)?;
        client.request_timeout = Duration::from_secs(config.api.request_timeout_secs);
        client.plan_timeout = Duration::from_secs(config.timeouts.plan_secs);
        client.execute_timeout = Duration::from_secs(config.timeouts.execute_secs);
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T> {
        let url = self.url(path);
        trace!("GET {url}");
        let builder = self.authorized(self.client.get(&url).query(query).timeout(timeout));
        self.send(operation, builder, timeout).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T> {
        let url = self.url(path);
        trace!("POST {url}");
        let builder = self.authorized(self.client.post(&url).json(body).timeout(timeout));
        self.send(operation, builder, timeout).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        form: Form,
        timeout: Duration,
    ) -> Result<T> {
        let url = self.url(path);
        trace!("POST {url} (form)");
        let builder = self.authorized(self.client.post(&url).multipart(form).timeout(timeout));
        self.send(operation, builder, timeout).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
        timeout: Duration,
    ) -> Result<T> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::timeout(operation, timeout.as_secs())
            } else {
                GatewayError::network(format!("{operation} request failed: {e}"))
            }
        })?;

        let status = response.status();
        debug!("{operation} -> {status}");

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                CertflowError::Gateway(GatewayError::InvalidResponse {
                    message: format!("Failed to parse {operation} response: {e}"),
                })
            });
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or_default();
        let body = response.text().await.unwrap_or_default();
        Err(CertflowError::Gateway(map_status(status, &body, retry_after)))
    }
}

/// Builds a multipart form from text fields and an optional PFX upload.
fn multipart_form(fields: Vec<(&'static str, String)>, pfx: Option<&[u8]>) -> Form {
    let form = fields
        .into_iter()
        .fold(Form::new(), |form, (name, value)| form.text(name, value));
    match pfx {
        Some(bytes) => form.part(
            "pfx_file",
            Part::bytes(bytes.to_vec()).file_name(PFX_FILE_NAME),
        ),
        None => form,
    }
}

/// Maps a non-success response to the error taxonomy.
fn map_status(status: StatusCode, body: &str, retry_after_secs: u64) -> GatewayError {
    let detail = extract_detail(body);
    match status.as_u16() {
        429 => GatewayError::RateLimited { retry_after_secs },
        401 | 403 => GatewayError::AuthenticationFailed { message: detail },
        404 => GatewayError::NotFound { resource: detail },
        code if code >= 500 => GatewayError::api_error(code, detail),
        code => GatewayError::Rejected {
            status: code,
            detail,
        },
    }
}

/// Pulls `detail` out of an error body, falling back to the raw text.
fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => String::from("no detail provided"),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl ApplianceGateway for ApplianceClient {
    async fn validate_material(&self, material: &MaterialPayload) -> Result<ValidateResponse> {
        let form = multipart_form(material.form_fields(), material.pfx_file());
        self.post_form("validate", "/deployments/validate", form, self.request_timeout)
            .await
    }

    async fn cached_usage(&self, device_id: u64, cert_name: &str) -> Result<Vec<ProfileRef>> {
        let query = [
            ("device_id", device_id.to_string()),
            ("cert_name", cert_name.to_string()),
        ];
        let usage: UsageResponse = self
            .get_json("cached usage", "/f5/cache/impact-preview", &query, self.request_timeout)
            .await?;
        Ok(usage.profiles)
    }

    async fn live_usage(&self, request: &LiveProbeRequest) -> Result<Vec<ProfileRef>> {
        let timeout = Duration::from_secs(request.timeout_seconds + DEADLINE_SLACK_SECS);
        let form = multipart_form(request.form_fields(), None);
        let usage: UsageResponse = self
            .post_form("live probe", "/deployments/preview", form, timeout)
            .await?;
        Ok(usage.profiles)
    }

    async fn plan(&self, request: &DeploymentRequest) -> Result<RemotePlan> {
        let form = multipart_form(request.form_fields(), request.material.pfx_file());
        let response: PlanResponse = self
            .post_form("plan", "/deployments/plan", form, self.plan_timeout)
            .await?;
        Ok(response.plan)
    }

    async fn execute(&self, request: &DeploymentRequest) -> Result<ExecutionOutcome> {
        let timeout = self.execute_timeout + Duration::from_secs(DEADLINE_SLACK_SECS);
        let form = multipart_form(request.form_fields(), request.material.pfx_file());
        let response: ExecuteResponse = self
            .post_form("execute", "/deployments/execute", form, timeout)
            .await?;

        if response.dry_run {
            return Err(CertflowError::Gateway(GatewayError::InvalidResponse {
                message: String::from("Execute call was answered as a dry run"),
            }));
        }
        response.result.ok_or_else(|| {
            CertflowError::Gateway(GatewayError::InvalidResponse {
                message: String::from("Execute response carries no result"),
            })
        })
    }

    async fn verify(&self, device_id: u64, object_name: &str) -> Result<VerificationResult> {
        let query = [
            ("device_id", device_id.to_string()),
            ("object_name", object_name.to_string()),
        ];
        self.get_json("verify", "/deployments/verify", &query, self.request_timeout)
            .await
    }

    async fn rescan(&self, device_id: u64, fast: bool) -> Result<()> {
        let body = RescanRequest {
            device_ids: vec![device_id],
            fast,
        };
        let _ack: serde_json::Value = self
            .post_json("rescan", "/f5/cache/refresh", &body, self.request_timeout)
            .await?;
        Ok(())
    }
}
