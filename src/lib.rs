// ============================================================================
// Linting
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Certflow
//!
//! Drift-aware TLS certificate deployment for load-balancing appliances.
//!
//! ## Overview
//!
//! Replacing a certificate on a load balancer touches every TLS profile that
//! references it, and through those profiles every virtual server. Certflow
//! runs a replacement as a guarded workflow against a certificate management
//! backend:
//!
//! 1. **Validate** the new material (PFX or PEM) before anything else
//! 2. **Preview** the impact: profiles and VIPs using the old certificate,
//!    from the inventory cache or a bounded live query
//! 3. **Plan** the change as a dry run
//! 4. **Gate** execution on a fresh live check: drift against the plan's
//!    snapshot requires an explicit second confirmation
//! 5. **Execute** once, never retried
//! 6. **Verify** by reading the installed object back, and refresh the cache
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`gateway`]: Backend API boundary and HTTP client
//! - [`impact`]: Impact snapshots, drift detection and preview resolution
//! - [`deploy`]: Validation, planning, the confirmation gate, execution,
//!   verification and cache refresh
//! - [`session`]: One deployment wizard run
//! - [`journal`]: Local history and per-target locks
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! api:
//!   base_url: https://certs.example.net
//!   token_env: CERTFLOW_API_TOKEN
//! timeouts:
//!   live_probe_secs: 45
//! deploy:
//!   chain_name: DigiCert_Global_G2_TLS_RSA_SHA256_2020_CA1
//!   partition: Common
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod gateway;
pub mod impact;
pub mod journal;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, EngineConfig};
pub use deploy::{
    ConfirmationGate, DeploymentExecutor, DeploymentPlan, DeploymentPlanner, DeploymentResult,
    GateState, ValidatedCertificate,
};
pub use error::{CertflowError, Result};
pub use gateway::{ApplianceClient, ApplianceGateway, CertificateMaterial, DeviceRef};
pub use impact::{DriftDetector, DriftReport, ImpactPreviewResolver, ImpactSnapshot, ProfileRef};
pub use journal::{JournalStore, LocalJournal};
pub use session::{DeploymentSession, SessionSettings, SubmitOutcome};
