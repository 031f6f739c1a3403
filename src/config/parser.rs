//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{CertflowError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::EngineConfig;

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(CertflowError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CertflowError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string. An empty document yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            CertflowError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration for backend: {}", config.api.base_url);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `CERTFLOW_<SECTION>_<KEY>` (e.g. `CERTFLOW_API_BASE_URL`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Returns the defaults with environment overrides applied. Used when no
    /// configuration file exists.
    #[must_use]
    pub fn defaults_with_env(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        Self::apply_env_overrides(&mut config);
        config
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut EngineConfig) {
        if let Ok(url) = std::env::var("CERTFLOW_API_BASE_URL") {
            debug!("Overriding api.base_url from environment");
            config.api.base_url = url;
        }

        if let Some(secs) = env_u64("CERTFLOW_TIMEOUTS_LIVE_PROBE_SECS") {
            debug!("Overriding timeouts.live_probe_secs from environment");
            config.timeouts.live_probe_secs = secs;
        }

        if let Some(secs) = env_u64("CERTFLOW_TIMEOUTS_EXECUTE_SECS") {
            debug!("Overriding timeouts.execute_secs from environment");
            config.timeouts.execute_secs = secs;
        }

        if let Ok(chain) = std::env::var("CERTFLOW_DEPLOY_CHAIN_NAME") {
            debug!("Overriding deploy.chain_name from environment");
            config.deploy.chain_name = chain;
        }

        if let Ok(partition) = std::env::var("CERTFLOW_DEPLOY_PARTITION") {
            debug!("Overriding deploy.partition from environment");
            config.deploy.partition = partition;
        }

        if let Ok(path) = std::env::var("CERTFLOW_JOURNAL_PATH") {
            debug!("Overriding journal.path from environment");
            config.journal.path = path;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                CertflowError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads the API bearer token from the variable named in the config.
    /// A missing or empty variable means unauthenticated requests.
    #[must_use]
    pub fn api_token(config: &EngineConfig) -> Option<String> {
        std::env::var(&config.api.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["certflow.yaml", "certflow.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(CertflowError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{DEFAULT_CHAIN_NAME, DEFAULT_PARTITION};

    #[test]
    fn test_parse_empty_config_yields_defaults() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml("", None).expect("empty config parses");

        assert_eq!(config.timeouts.live_probe_secs, 45);
        assert_eq!(config.timeouts.execute_secs, 60);
        assert_eq!(config.deploy.chain_name, DEFAULT_CHAIN_NAME);
        assert_eq!(config.deploy.partition, DEFAULT_PARTITION);
        assert!(config.deploy.update_profiles);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
api:
  base_url: https://certs.internal.example.com
  token_env: CERTS_TOKEN
  request_timeout_secs: 20
timeouts:
  live_probe_secs: 30
  execute_secs: 90
retry:
  max_attempts: 2
deploy:
  chain_name: Internal_Issuing_CA
  partition: Tenant
  update_profiles: false
journal:
  path: /var/lib/certflow
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("config parses");

        assert_eq!(config.api.base_url, "https://certs.internal.example.com");
        assert_eq!(config.api.token_env, "CERTS_TOKEN");
        assert_eq!(config.timeouts.live_probe_secs, 30);
        assert_eq!(config.timeouts.plan_secs, 45);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 1500);
        assert_eq!(config.deploy.partition, "Tenant");
        assert!(!config.deploy.update_profiles);
        assert!(config.deploy.fast_rescan);
        assert_eq!(config.journal.path, "/var/lib/certflow");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let parser = ConfigParser::new();
        let result = parser.parse_yaml("api: [unclosed", None);
        assert!(matches!(
            result,
            Err(CertflowError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("nested dirs");
        std::fs::write(dir.path().join("certflow.yaml"), "").expect("write config");

        let found = find_config_file(&nested).expect("config found");
        assert_eq!(found, dir.path().join("certflow.yaml"));
    }
}
