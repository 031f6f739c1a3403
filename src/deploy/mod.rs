//! Deployment workflow: validation, planning, the confirmation gate,
//! execution, read-back and the post-deployment cache refresh.

mod executor;
mod gate;
mod planner;
mod rescan;
mod types;
mod validation;
mod verify;

pub use executor::{DeploymentExecutor, ExecutionReport};
pub use gate::{
    ArmReason, ConfirmationGate, ExecuteAuthorization, GateEvent, GateState, GateTarget,
};
pub use planner::{DeploymentPlanner, derive_object_name};
pub use rescan::{RescanHandle, RescanTrigger};
pub use types::{
    CertificateAttributes, CertificateInput, ChainOptions, DeploymentParams, DeploymentPlan,
    DeploymentResult, ValidatedCertificate,
};
pub use validation::CertificateValidator;
pub use verify::VerificationProbe;
