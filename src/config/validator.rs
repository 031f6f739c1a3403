//! Configuration validation for the engine.
//!
//! Structural checks come from the `validator` derive on the config types.
//! Semantic checks that span fields are written by hand here. Both feed one
//! [`ValidationResult`].

use crate::error::{CertflowError, ConfigError, Result};
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use super::spec::{EngineConfig, MAX_LIVE_TIMEOUT_SECS, MIN_LIVE_TIMEOUT_SECS};

/// Validator for engine configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates an engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let result = self.collect(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(CertflowError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn collect(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.validate() {
            flatten_errors("", &errors, &mut result);
        }

        Self::validate_api(config, &mut result);
        Self::validate_timeouts(config, &mut result);
        Self::validate_retry(config, &mut result);
        Self::validate_journal(config, &mut result);

        result
    }

    fn validate_api(config: &EngineConfig, result: &mut ValidationResult) {
        if config.api.base_url.starts_with("http://")
            && !config.api.base_url.contains("localhost")
            && !config.api.base_url.contains("127.0.0.1")
        {
            result.warnings.push(format!(
                "api.base_url: '{}' is not HTTPS; private keys will travel in clear text",
                config.api.base_url
            ));
        }

        if config.api.base_url.ends_with("/api/v1") || config.api.base_url.ends_with("/api/v1/") {
            result.errors.push(ValidationError {
                field: String::from("api.base_url"),
                message: String::from("Base URL must not include the /api/v1 prefix"),
            });
        }

        if std::env::var(&config.api.token_env).is_err() {
            result.warnings.push(format!(
                "api.token_env: {} is not set; requests will be unauthenticated",
                config.api.token_env
            ));
        }
    }

    fn validate_timeouts(config: &EngineConfig, result: &mut ValidationResult) {
        let live = config.timeouts.live_probe_secs;
        if !(MIN_LIVE_TIMEOUT_SECS..=MAX_LIVE_TIMEOUT_SECS).contains(&live) {
            result.warnings.push(format!(
                "timeouts.live_probe_secs: {live}s is outside {MIN_LIVE_TIMEOUT_SECS}-{MAX_LIVE_TIMEOUT_SECS}s and will be clamped to {}s",
                config.timeouts.live_probe_clamped()
            ));
        }
    }

    fn validate_retry(config: &EngineConfig, result: &mut ValidationResult) {
        if config.retry.base_delay_ms > config.retry.max_delay_ms {
            result.errors.push(ValidationError {
                field: String::from("retry.base_delay_ms"),
                message: format!(
                    "Base delay {}ms exceeds the cap of {}ms",
                    config.retry.base_delay_ms, config.retry.max_delay_ms
                ),
            });
        }
    }

    fn validate_journal(config: &EngineConfig, result: &mut ValidationResult) {
        if config.journal.path.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("journal.path"),
                message: String::from("Journal path cannot be empty"),
            });
        }

        if config.journal.lock_ttl_secs <= 0 {
            result.errors.push(ValidationError {
                field: String::from("journal.lock_ttl_secs"),
                message: String::from("Lock TTL must be positive"),
            });
        }
    }
}

/// Walks derive-produced errors into flat `section.field` entries.
fn flatten_errors(prefix: &str, errors: &ValidationErrors, result: &mut ValidationResult) {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map_or_else(|| format!("failed '{}' check", err.code), ToString::to_string);
                    result.errors.push(ValidationError {
                        field: path.clone(),
                        message,
                    });
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten_errors(&path, inner, result),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten_errors(&format!("{path}[{index}]"), inner, result);
                }
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let result = ConfigValidator::new().collect(&EngineConfig::default());
        assert!(result.is_valid(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn test_derive_errors_are_flattened() {
        let mut config = EngineConfig::default();
        config.api.base_url = String::from("not a url");
        config.retry.max_attempts = 0;

        let result = ConfigValidator::new().collect(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"api.base_url"));
        assert!(fields.contains(&"retry.max_attempts"));
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_out_of_window_live_timeout_warns() {
        let mut config = EngineConfig::default();
        config.timeouts.live_probe_secs = 120;

        let result = ConfigValidator::new().collect(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("clamped to 60s")));
    }

    #[test]
    fn test_semantic_errors() {
        let mut config = EngineConfig::default();
        config.api.base_url = String::from("https://certs.example.com/api/v1");
        config.retry.base_delay_ms = 10_000;
        config.journal.lock_ttl_secs = 0;

        let result = ConfigValidator::new().collect(&config);
        assert_eq!(result.error_count(), 3);
    }
}
