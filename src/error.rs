//! Error types for the certflow deployment engine.
//!
//! This module provides the error hierarchy for every stage of a deployment
//! session: configuration, the remote management API, validation, planning,
//! the confirmation gate, execution, verification and the local journal.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the certflow engine.
#[derive(Debug, Error)]
pub enum CertflowError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Remote management API errors.
    #[error("Appliance API error: {0}")]
    Gateway(#[from] GatewayError),

    /// Deployment workflow errors.
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    /// Confirmation gate errors.
    #[error("Confirmation gate error: {0}")]
    Gate(#[from] GateError),

    /// Deployment journal errors.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors returned by the certificate management API.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Authentication or authorization failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The API rejected the request with a human-readable detail.
    #[error("{detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Detail message from the provider, surfaced verbatim.
        detail: String,
    },

    /// API request failed with an unexpected status.
    #[error("API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The requested resource does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },

    /// Network error.
    #[error("Network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The request did not complete within its deadline.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Deadline in seconds.
        timeout_secs: u64,
    },

    /// Invalid response from API.
    #[error("Invalid response from API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Deployment workflow errors.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Certificate material was rejected by the validation endpoint.
    #[error("Certificate rejected: {detail}")]
    MaterialRejected {
        /// Provider detail message.
        detail: String,
    },

    /// An operation required a validated certificate.
    #[error("Certificate has not been validated")]
    NotValidated,

    /// Execution was requested without gate authorization.
    #[error("Execution not authorized in gate state {state}")]
    NotAuthorized {
        /// Current gate state.
        state: String,
    },

    /// The session is missing an input required for the step.
    #[error("Missing {what} for this step")]
    MissingInput {
        /// What is missing.
        what: String,
    },

    /// Plan could not be produced.
    #[error("Plan failed for {device}: {message}")]
    PlanFailed {
        /// Device hostname.
        device: String,
        /// Error detail.
        message: String,
    },

    /// The mutating deployment call failed.
    #[error("Deployment to {device} failed: {message}")]
    ExecutionFailed {
        /// Device hostname.
        device: String,
        /// Error detail.
        message: String,
    },

    /// Post-deployment verification failed. The deployment still stands.
    #[error("Verification of '{object_name}' failed: {message}")]
    VerificationFailed {
        /// Object that was read back.
        object_name: String,
        /// Error detail.
        message: String,
    },
}

/// Confirmation gate errors.
#[derive(Debug, Error)]
pub enum GateError {
    /// The requested transition does not exist in the gate's table.
    #[error("Invalid gate transition: {event} in state {from}")]
    InvalidTransition {
        /// State the gate was in.
        from: String,
        /// Event that was applied.
        event: String,
    },
}

/// Deployment journal errors.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Journal file is corrupted.
    #[error("Journal is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Journal write failed.
    #[error("Failed to write journal: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire deployment lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Another deployment to the same target holds the lock.
    #[error("Deployment to {target} is locked by {holder} (since {since})")]
    LockedByOther {
        /// Locked target key.
        target: String,
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },
}

/// Result type alias for certflow operations.
pub type Result<T> = std::result::Result<T, CertflowError>;

impl CertflowError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error belongs to the transient class that read
    /// operations may retry: request timeout, rate limiting, 5xx, network.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Gateway(
                GatewayError::Timeout { .. }
                | GatewayError::RateLimited { .. }
                | GatewayError::NetworkError { .. },
            ) => true,
            Self::Gateway(
                GatewayError::ApiRequestFailed { status, .. } | GatewayError::Rejected { status, .. },
            ) => *status >= 500,
            _ => false,
        }
    }

    /// Returns the server-suggested retry delay in seconds, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Gateway(GatewayError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Returns true if the remote side reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Gateway(GatewayError::NotFound { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl GatewayError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates a timeout error for the named operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs,
        }
    }
}

impl JournalError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CertflowError::from(GatewayError::timeout("live probe", 45)).is_retryable());
        assert!(CertflowError::from(GatewayError::RateLimited { retry_after_secs: 3 }).is_retryable());
        assert!(CertflowError::from(GatewayError::api_error(503, "busy")).is_retryable());
        assert!(CertflowError::from(GatewayError::network("reset")).is_retryable());

        assert!(!CertflowError::from(GatewayError::api_error(404, "gone")).is_retryable());
        assert!(
            !CertflowError::from(GatewayError::AuthenticationFailed {
                message: String::from("bad token"),
            })
            .is_retryable()
        );
        assert!(!CertflowError::from(DeployError::NotValidated).is_retryable());
    }

    #[test]
    fn test_rejected_detail_is_verbatim() {
        let err = GatewayError::Rejected {
            status: 400,
            detail: String::from("Could not open PFX. Is the password correct?"),
        };
        assert_eq!(err.to_string(), "Could not open PFX. Is the password correct?");
    }
}
