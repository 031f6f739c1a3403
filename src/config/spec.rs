//! Configuration types for the deployment engine.
//!
//! This module defines the structs that map to the `certflow.yaml` file.
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration pointing at a local backend.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default chain certificate installed alongside new certificates.
pub const DEFAULT_CHAIN_NAME: &str = "DigiCert_Global_G2_TLS_RSA_SHA256_2020_CA1";

/// Default administrative partition on the appliance.
pub const DEFAULT_PARTITION: &str = "Common";

/// Lower bound for the live probe timeout, in seconds.
pub const MIN_LIVE_TIMEOUT_SECS: u64 = 10;

/// Upper bound for the live probe timeout, in seconds.
pub const MAX_LIVE_TIMEOUT_SECS: u64 = 60;

/// The root configuration structure for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Certificate management API settings.
    #[serde(default)]
    #[validate(nested)]
    pub api: ApiConfig,
    /// Per-operation deadlines.
    #[serde(default)]
    #[validate(nested)]
    pub timeouts: TimeoutConfig,
    /// Read retry policy.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
    /// Deployment defaults.
    #[serde(default)]
    #[validate(nested)]
    pub deploy: DeployDefaults,
    /// Local journal settings.
    #[serde(default)]
    pub journal: JournalConfig,
}

/// Certificate management API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ApiConfig {
    /// Base URL of the backend, without the `/api/v1` suffix.
    #[serde(default = "default_base_url")]
    #[validate(url)]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    #[validate(length(min = 1))]
    pub token_env: String,
    /// Standard RPC deadline for reads, in seconds.
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,
}

/// Per-operation deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct TimeoutConfig {
    /// Live impact probe deadline. Clamped to 10..=60 at use.
    #[serde(default = "default_live_probe_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub live_probe_secs: u64,
    /// Plan request deadline.
    #[serde(default = "default_plan_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub plan_secs: u64,
    /// Execute request deadline.
    #[serde(default = "default_execute_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub execute_secs: u64,
}

/// Read retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Defaults applied to deployment requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DeployDefaults {
    /// Chain certificate name.
    #[serde(default = "default_chain_name")]
    #[validate(length(min = 1))]
    pub chain_name: String,
    /// Partition for created objects.
    #[serde(default = "default_partition")]
    #[validate(length(min = 1))]
    pub partition: String,
    /// Install the chain embedded in PFX material.
    #[serde(default = "default_true")]
    pub install_chain_from_pfx: bool,
    /// Repoint affected profiles to the new certificate.
    #[serde(default = "default_true")]
    pub update_profiles: bool,
    /// Consult the inventory cache before probing live.
    #[serde(default = "default_true")]
    pub prefer_cache: bool,
    /// Request a fast cache refresh after execution.
    #[serde(default = "default_true")]
    pub fast_rescan: bool,
}

/// Local journal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalConfig {
    /// Journal directory. A leading `~/` expands to the home directory.
    #[serde(default = "default_journal_path")]
    pub path: String,
    /// Seconds after which a deployment lock is considered stale.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: i64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            live_probe_secs: default_live_probe_timeout(),
            plan_secs: default_plan_timeout(),
            execute_secs: default_execute_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Live probe deadline clamped to the supported window.
    #[must_use]
    pub fn live_probe_clamped(&self) -> u64 {
        self.live_probe_secs
            .clamp(MIN_LIVE_TIMEOUT_SECS, MAX_LIVE_TIMEOUT_SECS)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for DeployDefaults {
    fn default() -> Self {
        Self {
            chain_name: default_chain_name(),
            partition: default_partition(),
            install_chain_from_pfx: true,
            update_profiles: true,
            prefer_cache: true,
            fast_rescan: true,
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

impl JournalConfig {
    /// Resolves the journal directory, expanding a leading `~/`.
    #[must_use]
    pub fn resolved_path(&self) -> std::path::PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        std::path::PathBuf::from(&self.path)
    }
}

fn default_base_url() -> String {
    String::from("http://localhost:8000")
}

fn default_token_env() -> String {
    String::from("CERTFLOW_API_TOKEN")
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_live_probe_timeout() -> u64 {
    45
}

const fn default_plan_timeout() -> u64 {
    45
}

const fn default_execute_timeout() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1500
}

const fn default_max_delay_ms() -> u64 {
    6000
}

fn default_chain_name() -> String {
    String::from(DEFAULT_CHAIN_NAME)
}

fn default_partition() -> String {
    String::from(DEFAULT_PARTITION)
}

const fn default_true() -> bool {
    true
}

fn default_journal_path() -> String {
    String::from(".certflow")
}

const fn default_lock_ttl() -> i64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_timeout_clamp() {
        let mut timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.live_probe_clamped(), 45);

        timeouts.live_probe_secs = 2;
        assert_eq!(timeouts.live_probe_clamped(), 10);

        timeouts.live_probe_secs = 300;
        assert_eq!(timeouts.live_probe_clamped(), 60);
    }

    #[test]
    fn test_journal_path_home_expansion() {
        let journal = JournalConfig {
            path: String::from("~/.certflow"),
            lock_ttl_secs: 300,
        };
        let resolved = journal.resolved_path();
        if dirs::home_dir().is_some() {
            assert!(resolved.ends_with(".certflow"));
            assert!(!resolved.starts_with("~"));
        }
    }
}
