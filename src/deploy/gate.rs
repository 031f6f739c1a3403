//! Confirmation gate for mutating deployments.
//!
//! The gate is a finite state machine driven by [`GateEvent`]s. Execution is
//! only reachable through an [`ExecuteAuthorization`], which the gate hands out
//! once, and only in [`GateState::ExecuteAuthorized`].
//!
//! ```text
//! Idle -> PlanRequested -> PlanReady                      (dry run)
//!                       -> LiveCheckPending -> NoDriftConfirmed -> ExecuteAuthorized
//!                                           -> DriftArmed -(submit)-> ExecuteAuthorized
//! ExecuteAuthorized -(finished)-> Idle
//! ```

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DeployError, GateError, Result};
use crate::impact::DriftReport;

/// Why the gate armed instead of authorizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmReason {
    /// The live check found drift.
    Drift(DriftReport),
    /// The live check could not complete.
    CheckFailed(String),
}

/// Gate states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Nothing in flight.
    Idle,
    /// A plan is being built.
    PlanRequested {
        /// Whether the submission asked for execution.
        execute: bool,
    },
    /// A dry-run plan is ready.
    PlanReady,
    /// A fresh live impact check is running.
    LiveCheckPending,
    /// The live check matched the plan snapshot.
    NoDriftConfirmed,
    /// The live check failed or found drift; one more confirmation is needed.
    DriftArmed {
        /// When the gate armed.
        armed_at: Instant,
        /// What armed it.
        reason: ArmReason,
    },
    /// Execution may proceed.
    ExecuteAuthorized,
}

impl GateState {
    /// Short state name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PlanRequested { .. } => "PlanRequested",
            Self::PlanReady => "PlanReady",
            Self::LiveCheckPending => "LiveCheckPending",
            Self::NoDriftConfirmed => "NoDriftConfirmed",
            Self::DriftArmed { .. } => "DriftArmed",
            Self::ExecuteAuthorized => "ExecuteAuthorized",
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Inputs to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// The operator submitted the wizard.
    Submit {
        /// Dry-run mode of the submission.
        dry_run: bool,
    },
    /// The plan was built.
    PlanBuilt,
    /// The plan could not be built.
    PlanFailed,
    /// The live check matched the plan snapshot.
    LiveCheckClean,
    /// The live check found drift.
    LiveCheckDrift(DriftReport),
    /// The live check could not complete.
    LiveCheckFailed(String),
    /// Proceed from a clean check without operator action.
    Confirm,
    /// The execute attempt finished, successfully or not.
    ExecutionFinished,
    /// Target, certificate or mode changed.
    Reset,
}

impl GateEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "Submit",
            Self::PlanBuilt => "PlanBuilt",
            Self::PlanFailed => "PlanFailed",
            Self::LiveCheckClean => "LiveCheckClean",
            Self::LiveCheckDrift(_) => "LiveCheckDrift",
            Self::LiveCheckFailed(_) => "LiveCheckFailed",
            Self::Confirm => "Confirm",
            Self::ExecutionFinished => "ExecutionFinished",
            Self::Reset => "Reset",
        }
    }
}

/// Proof that the gate authorized one execute attempt. Not clonable; the
/// executor consumes it.
#[derive(Debug)]
pub struct ExecuteAuthorization {
    _private: (),
}

/// What the gate is bound to. A change resets the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateTarget {
    /// Device id.
    pub device_id: u64,
    /// Certificate identity (old name or new object).
    pub certificate: String,
    /// Dry-run mode.
    pub dry_run: bool,
}

/// Finite-state confirmation gate.
#[derive(Debug)]
pub struct ConfirmationGate {
    state: GateState,
    target: Option<GateTarget>,
    issued: bool,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The transition table. `None` means the event is not accepted in `state`.
fn transition(state: &GateState, event: &GateEvent, now: Instant) -> Option<GateState> {
    use GateEvent as E;
    use GateState as S;

    match (state, event) {
        (_, E::Reset) => Some(S::Idle),
        (S::Idle | S::PlanReady, E::Submit { dry_run }) => {
            Some(S::PlanRequested { execute: !dry_run })
        }
        (S::PlanRequested { execute: false }, E::PlanBuilt) => Some(S::PlanReady),
        (S::PlanRequested { execute: true }, E::PlanBuilt) => Some(S::LiveCheckPending),
        (S::PlanRequested { .. }, E::PlanFailed) => Some(S::Idle),
        (S::LiveCheckPending, E::LiveCheckClean) => Some(S::NoDriftConfirmed),
        (S::LiveCheckPending, E::LiveCheckDrift(report)) => Some(S::DriftArmed {
            armed_at: now,
            reason: ArmReason::Drift(report.clone()),
        }),
        (S::LiveCheckPending, E::LiveCheckFailed(message)) => Some(S::DriftArmed {
            armed_at: now,
            reason: ArmReason::CheckFailed(message.clone()),
        }),
        (S::NoDriftConfirmed, E::Confirm) => Some(S::ExecuteAuthorized),
        (S::DriftArmed { .. }, E::Submit { dry_run: false }) => Some(S::ExecuteAuthorized),
        (S::DriftArmed { .. }, E::Submit { dry_run: true }) => {
            Some(S::PlanRequested { execute: false })
        }
        (S::ExecuteAuthorized, E::ExecutionFinished) => Some(S::Idle),
        _ => None,
    }
}

impl ConfirmationGate {
    /// Creates an idle gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: GateState::Idle,
            target: None,
            issued: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &GateState {
        &self.state
    }

    /// True if the next execute submission proceeds without a re-check.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        matches!(self.state, GateState::DriftArmed { .. })
    }

    /// Binds the gate to a target. Any change from the previous target resets
    /// it to `Idle`.
    pub fn bind(&mut self, target: GateTarget) {
        if self.target.as_ref() != Some(&target) {
            if self.state != GateState::Idle {
                debug!("Gate target changed, resetting from {}", self.state);
            }
            self.state = GateState::Idle;
            self.issued = false;
            self.target = Some(target);
        }
    }

    /// Applies an event.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidTransition`] if the event is not accepted
    /// in the current state. The state is left unchanged.
    pub fn apply(&mut self, event: GateEvent) -> Result<&GateState> {
        let now = Instant::now();
        let next = transition(&self.state, &event, now).ok_or_else(|| {
            GateError::InvalidTransition {
                from: self.state.name().to_string(),
                event: event.name().to_string(),
            }
        })?;

        if let (GateState::DriftArmed { armed_at, .. }, GateState::ExecuteAuthorized) =
            (&self.state, &next)
        {
            warn!(
                "Executing on a confirmation armed {:.0}s ago without a fresh impact check",
                now.duration_since(*armed_at).as_secs_f64()
            );
        }

        debug!("Gate {} --{}--> {}", self.state, event.name(), next);
        self.state = next;
        self.issued = false;
        Ok(&self.state)
    }

    /// Hands out the single authorization for the current execute attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::NotAuthorized`] outside `ExecuteAuthorized` or if
    /// the authorization was already taken.
    pub fn authorization(&mut self) -> Result<ExecuteAuthorization> {
        if self.state != GateState::ExecuteAuthorized || self.issued {
            return Err(DeployError::NotAuthorized {
                state: self.state.name().to_string(),
            }
            .into());
        }
        self.issued = true;
        Ok(ExecuteAuthorization { _private: () })
    }
}

#[cfg(test)]
pub(crate) fn test_authorization() -> ExecuteAuthorization {
    ExecuteAuthorization { _private: () }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CertflowError;

    fn target(dry_run: bool) -> GateTarget {
        GateTarget {
            device_id: 1,
            certificate: String::from("www_example_com_2025"),
            dry_run,
        }
    }

    fn drift() -> DriftReport {
        DriftReport {
            added: vec![String::from("Common/P2")],
            ..DriftReport::default()
        }
    }

    #[test]
    fn test_dry_run_path() {
        let mut gate = ConfirmationGate::new();
        gate.apply(GateEvent::Submit { dry_run: true }).unwrap();
        assert_eq!(gate.apply(GateEvent::PlanBuilt).unwrap(), &GateState::PlanReady);
        assert!(gate.authorization().is_err());
    }

    #[test]
    fn test_clean_check_authorizes_once() {
        let mut gate = ConfirmationGate::new();
        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        gate.apply(GateEvent::PlanBuilt).unwrap();
        gate.apply(GateEvent::LiveCheckClean).unwrap();
        gate.apply(GateEvent::Confirm).unwrap();

        assert!(gate.authorization().is_ok());
        assert!(gate.authorization().is_err(), "authorization is single-use");

        gate.apply(GateEvent::ExecutionFinished).unwrap();
        assert_eq!(gate.state(), &GateState::Idle);
    }

    #[test]
    fn test_drift_requires_exactly_one_more_submit() {
        let mut gate = ConfirmationGate::new();
        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        gate.apply(GateEvent::PlanBuilt).unwrap();
        gate.apply(GateEvent::LiveCheckDrift(drift())).unwrap();

        assert!(gate.is_armed());
        assert!(gate.authorization().is_err());

        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        assert_eq!(gate.state(), &GateState::ExecuteAuthorized);
        assert!(gate.authorization().is_ok());
    }

    #[test]
    fn test_failed_check_arms() {
        let mut gate = ConfirmationGate::new();
        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        gate.apply(GateEvent::PlanBuilt).unwrap();
        gate.apply(GateEvent::LiveCheckFailed(String::from("timed out"))).unwrap();

        assert!(matches!(
            gate.state(),
            GateState::DriftArmed { reason: ArmReason::CheckFailed(msg), .. } if msg == "timed out"
        ));
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut gate = ConfirmationGate::new();
        let err = gate.apply(GateEvent::Confirm).unwrap_err();
        assert!(matches!(err, CertflowError::Gate(GateError::InvalidTransition { .. })));
        assert_eq!(gate.state(), &GateState::Idle);

        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        assert!(gate.apply(GateEvent::LiveCheckClean).is_err());
    }

    #[test]
    fn test_plan_failure_returns_to_idle() {
        let mut gate = ConfirmationGate::new();
        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        gate.apply(GateEvent::PlanFailed).unwrap();
        assert_eq!(gate.state(), &GateState::Idle);
    }

    #[test]
    fn test_target_change_resets() {
        let mut gate = ConfirmationGate::new();
        gate.bind(target(false));
        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        gate.apply(GateEvent::PlanBuilt).unwrap();
        gate.apply(GateEvent::LiveCheckDrift(drift())).unwrap();

        gate.bind(target(false));
        assert!(gate.is_armed(), "same target keeps the armed state");

        gate.bind(target(true));
        assert_eq!(gate.state(), &GateState::Idle);

        gate.bind(GateTarget {
            device_id: 2,
            ..target(true)
        });
        assert_eq!(gate.state(), &GateState::Idle);
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut gate = ConfirmationGate::new();
        gate.apply(GateEvent::Submit { dry_run: false }).unwrap();
        gate.apply(GateEvent::Reset).unwrap();
        assert_eq!(gate.state(), &GateState::Idle);
    }
}
