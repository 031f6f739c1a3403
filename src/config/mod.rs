//! Configuration module for the certflow engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `certflow.yaml`
//! - Environment and `.env` overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    ApiConfig, DEFAULT_CHAIN_NAME, DEFAULT_PARTITION, DeployDefaults, EngineConfig, JournalConfig,
    MAX_LIVE_TIMEOUT_SECS, MIN_LIVE_TIMEOUT_SECS, RetryConfig, TimeoutConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
