//! Deployment session: one wizard run against one device.
//!
//! The session owns everything a deployment needs between steps (target,
//! material, validation result, impact snapshot, plan, gate) and drives the
//! control flow:
//!
//! preview -> plan (dry run) -> gate (fresh live check) -> execute -> verify,
//! with the cache refresh fired after a successful execute.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::deploy::{
    CertificateInput, CertificateValidator, ChainOptions, ConfirmationGate, DeploymentExecutor,
    DeploymentParams, DeploymentPlan, DeploymentPlanner, ExecutionReport, GateEvent, GateState,
    GateTarget, ValidatedCertificate, VerificationProbe,
};
use crate::error::{DeployError, Result};
use crate::gateway::{ApplianceGateway, CertificateMaterial, DeviceRef, VerificationResult};
use crate::impact::{
    DriftDetector, DriftReport, ImpactPreviewResolver, ImpactQuery, ImpactSnapshot, ResolveOutcome,
    SnapshotHasher,
};
use crate::retry::RetryPolicy;

/// Tunables for a session, usually taken from [`EngineConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Read retry policy.
    pub retry: RetryPolicy,
    /// Live probe deadline.
    pub live_timeout: Duration,
    /// Plan deadline, in seconds.
    pub plan_timeout_secs: u64,
    /// Execute deadline, in seconds.
    pub execute_timeout_secs: u64,
    /// Consult the inventory cache on preview.
    pub prefer_cache: bool,
    /// Fast cache refresh after execution.
    pub fast_rescan: bool,
    /// Initial chain and profile options.
    pub options: ChainOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SessionSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retry),
            live_timeout: Duration::from_secs(config.timeouts.live_probe_clamped()),
            plan_timeout_secs: config.timeouts.plan_secs,
            execute_timeout_secs: config.timeouts.execute_secs,
            prefer_cache: config.deploy.prefer_cache,
            fast_rescan: config.deploy.fast_rescan,
            options: ChainOptions::from(&config.deploy),
        }
    }
}

/// Result of submitting the wizard.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Dry run: the plan is ready for review.
    Planned(DeploymentPlan),
    /// The live check found drift or failed. Submit again to proceed.
    ConfirmationRequired {
        /// The plan awaiting confirmation.
        plan: DeploymentPlan,
        /// Drift between the plan snapshot and the live state.
        drift: Option<DriftReport>,
        /// Why the live check could not complete.
        warning: Option<String>,
    },
    /// The deployment was executed.
    Deployed {
        /// The plan that was confirmed.
        plan: DeploymentPlan,
        /// Execution result and cache refresh handle.
        report: ExecutionReport,
    },
}

/// One deployment wizard instance.
pub struct DeploymentSession {
    device: DeviceRef,
    old_cert_name: Option<String>,
    certificate_id: Option<u64>,
    certificate: Option<CertificateInput>,
    validated: Option<ValidatedCertificate>,
    options: ChainOptions,
    selected_profiles: Option<Vec<String>>,
    dry_run: bool,
    snapshot: Option<ImpactSnapshot>,
    plan: Option<DeploymentPlan>,
    last_deployed: Option<String>,
    gate: ConfirmationGate,
    prefer_cache: bool,
    live_timeout: Duration,
    resolver: ImpactPreviewResolver,
    validator: CertificateValidator,
    planner: DeploymentPlanner,
    executor: DeploymentExecutor,
    verifier: VerificationProbe,
}

impl DeploymentSession {
    /// Starts a session against `device`. Sessions start in dry-run mode.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ApplianceGateway>,
        device: DeviceRef,
        settings: SessionSettings,
    ) -> Self {
        let mut session = Self {
            resolver: ImpactPreviewResolver::new(Arc::clone(&gateway), settings.retry),
            validator: CertificateValidator::new(Arc::clone(&gateway), settings.retry),
            planner: DeploymentPlanner::new(
                Arc::clone(&gateway),
                settings.retry,
                settings.plan_timeout_secs,
            ),
            executor: DeploymentExecutor::new(Arc::clone(&gateway), settings.execute_timeout_secs)
                .with_fast_rescan(settings.fast_rescan),
            verifier: VerificationProbe::new(gateway, settings.retry),
            device,
            old_cert_name: None,
            certificate_id: None,
            certificate: None,
            validated: None,
            options: settings.options,
            selected_profiles: None,
            dry_run: true,
            snapshot: None,
            plan: None,
            last_deployed: None,
            gate: ConfirmationGate::new(),
            prefer_cache: settings.prefer_cache,
            live_timeout: settings.live_timeout,
        };
        session.sync_gate();
        session
    }

    /// Target device.
    #[must_use]
    pub const fn device(&self) -> &DeviceRef {
        &self.device
    }

    /// Current gate state.
    #[must_use]
    pub const fn gate_state(&self) -> &GateState {
        self.gate.state()
    }

    /// Last captured impact snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&ImpactSnapshot> {
        self.snapshot.as_ref()
    }

    /// Last built plan.
    #[must_use]
    pub const fn plan(&self) -> Option<&DeploymentPlan> {
        self.plan.as_ref()
    }

    /// Validation result for the current material.
    #[must_use]
    pub const fn validated(&self) -> Option<&ValidatedCertificate> {
        self.validated.as_ref()
    }

    /// Certificate being deployed.
    #[must_use]
    pub const fn certificate(&self) -> Option<&CertificateInput> {
        self.certificate.as_ref()
    }

    /// Whether submissions only plan.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Changes the target device.
    pub fn set_device(&mut self, device: DeviceRef) {
        if self.device != device {
            self.device = device;
            self.invalidate_impact();
            self.sync_gate();
        }
    }

    /// Sets the certificate being replaced and, if inventoried, its id.
    pub fn set_old_certificate(&mut self, name: impl Into<String>, certificate_id: Option<u64>) {
        let name = Some(name.into()).filter(|n| !n.trim().is_empty());
        if self.old_cert_name != name || self.certificate_id != certificate_id {
            self.old_cert_name = name;
            self.certificate_id = certificate_id;
            self.invalidate_impact();
            self.sync_gate();
        }
    }

    /// Switches between dry-run and execute mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        if self.dry_run != dry_run {
            self.dry_run = dry_run;
            self.sync_gate();
        }
    }

    /// Supplies freshly uploaded material. Any earlier validation is dropped.
    pub fn set_material(&mut self, material: CertificateMaterial) {
        self.replace_certificate(CertificateInput::Material(material));
    }

    /// Deploys an object already installed on the device.
    pub fn set_reference(&mut self, object_name: impl Into<String>) {
        self.replace_certificate(CertificateInput::Reference {
            object_name: object_name.into(),
        });
    }

    /// Replaces chain and profile options.
    pub fn set_options(&mut self, options: ChainOptions) {
        if self.options != options {
            self.options = options;
            self.invalidate_plan();
        }
    }

    /// Restricts profile updates to a selection, or clears the restriction.
    pub fn select_profiles(&mut self, selection: Option<Vec<String>>) {
        if self.selected_profiles != selection {
            self.selected_profiles = selection;
            self.invalidate_plan();
        }
    }

    fn replace_certificate(&mut self, input: CertificateInput) {
        self.certificate = Some(input);
        self.validated = None;
        self.invalidate_plan();
    }

    fn invalidate_impact(&mut self) {
        self.snapshot = None;
        self.plan = None;
    }

    fn invalidate_plan(&mut self) {
        self.plan = None;
        if *self.gate.state() != GateState::Idle {
            debug!("Deployment inputs changed, resetting confirmation gate");
        }
        // Reset is accepted from every state.
        let _ = self.gate.apply(GateEvent::Reset);
    }

    fn sync_gate(&mut self) {
        self.gate.bind(GateTarget {
            device_id: self.device.id,
            certificate: self.old_cert_name.clone().unwrap_or_default(),
            dry_run: self.dry_run,
        });
    }

    /// Validates the certificate being deployed. Uploaded material goes to
    /// the validation endpoint; an installed object is read back.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingInput`] without a certificate, or the
    /// validator's error. A failed validation leaves the session unvalidated.
    pub async fn validate(&mut self) -> Result<&ValidatedCertificate> {
        self.validated = None;
        let validated = match &self.certificate {
            Some(CertificateInput::Material(material)) => {
                self.validator.validate(material).await?
            }
            Some(CertificateInput::Reference { object_name }) => {
                self.validator
                    .validate_reference(&self.device, object_name)
                    .await?
            }
            None => {
                return Err(DeployError::MissingInput {
                    what: String::from("certificate"),
                }
                .into());
            }
        };
        Ok(&*self.validated.insert(validated))
    }

    /// Resolves and stores the impact snapshot for the certificate being
    /// replaced. Returns `None` if a newer preview superseded this one.
    ///
    /// A refreshed preview replaces the snapshot any plan was built from, so
    /// the plan is dropped and a pending drift confirmation is withdrawn.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingInput`] without an old certificate, or
    /// the resolver's error.
    pub async fn preview(&mut self) -> Result<Option<&ImpactSnapshot>> {
        self.invalidate_plan();
        self.resolve_snapshot().await
    }

    async fn resolve_snapshot(&mut self) -> Result<Option<&ImpactSnapshot>> {
        let Some(cert_name) = self.old_cert_name.clone() else {
            return Err(DeployError::MissingInput {
                what: String::from("certificate to replace"),
            }
            .into());
        };

        let mut query = ImpactQuery::live(self.device.id, cert_name)
            .with_timeout(self.live_timeout);
        query.partition.clone_from(&self.options.partition);
        if self.prefer_cache {
            if let Some(id) = self.certificate_id {
                query = query.with_cache(id);
            }
        }

        match self.resolver.resolve(&query).await? {
            ResolveOutcome::Resolved(snapshot) => {
                if let Some(advisory) = &snapshot.advisory {
                    warn!("Impact preview degraded: {advisory}");
                }
                info!(
                    "Impact preview for '{}' on {}: {} profile(s) from {} [{}]",
                    query.cert_name,
                    self.device,
                    snapshot.profiles.len(),
                    snapshot.source,
                    SnapshotHasher::new().short_hash(&snapshot.digest())
                );
                Ok(Some(&*self.snapshot.insert(snapshot)))
            }
            ResolveOutcome::Superseded => Ok(None),
        }
    }

    /// Submits the wizard.
    ///
    /// In dry-run mode this builds a plan. In execute mode it builds a plan,
    /// checks the live state against the plan's snapshot, and executes when
    /// the check is clean. Drift or a failed check arms the gate: the next
    /// execute submission proceeds without another check.
    ///
    /// # Errors
    ///
    /// Returns planning and execution errors. Drift is not an error.
    pub async fn submit(&mut self) -> Result<SubmitOutcome> {
        self.sync_gate();

        if self.gate.is_armed() && !self.dry_run {
            if let Some(plan) = self.plan.clone() {
                self.gate.apply(GateEvent::Submit { dry_run: false })?;
                info!("Proceeding on operator confirmation");
                return self.run_execute(plan).await;
            }
            warn!("Confirmed plan is gone; planning and checking again");
        }

        if !matches!(self.gate.state(), GateState::Idle | GateState::PlanReady) {
            // Left by a dropped submission or a withdrawn confirmation.
            debug!("Discarding stale gate state {}", self.gate.state());
            let _ = self.gate.apply(GateEvent::Reset);
        }
        self.gate.apply(GateEvent::Submit {
            dry_run: self.dry_run,
        })?;

        let plan = match self.build_plan().await {
            Ok(plan) => plan,
            Err(e) => {
                self.gate.apply(GateEvent::PlanFailed)?;
                return Err(e);
            }
        };
        self.plan = Some(plan.clone());
        self.gate.apply(GateEvent::PlanBuilt)?;

        if self.dry_run {
            return Ok(SubmitOutcome::Planned(plan));
        }

        match self.live_check(&plan).await {
            LiveCheck::Clean => {
                self.gate.apply(GateEvent::LiveCheckClean)?;
                self.gate.apply(GateEvent::Confirm)?;
                self.run_execute(plan).await
            }
            LiveCheck::Drift(report) => {
                warn!("Impact drift since preview: {report}");
                self.gate.apply(GateEvent::LiveCheckDrift(report.clone()))?;
                Ok(SubmitOutcome::ConfirmationRequired {
                    plan,
                    drift: Some(report),
                    warning: None,
                })
            }
            LiveCheck::Failed(message) => {
                warn!("Live impact check failed: {message}");
                self.gate.apply(GateEvent::LiveCheckFailed(message.clone()))?;
                Ok(SubmitOutcome::ConfirmationRequired {
                    plan,
                    drift: None,
                    warning: Some(message),
                })
            }
        }
    }

    /// Reads back a deployed object. Defaults to the object this session
    /// last deployed. A failure does not affect the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingInput`] when no object is known, or
    /// [`DeployError::VerificationFailed`].
    pub async fn verify(&self, object_name: Option<&str>) -> Result<VerificationResult> {
        let name = object_name
            .or(self.last_deployed.as_deref())
            .ok_or_else(|| DeployError::MissingInput {
                what: String::from("object name to verify"),
            })?;
        self.verifier.verify(&self.device, name).await
    }

    fn params(&self) -> Result<DeploymentParams> {
        let certificate = self.certificate.clone().ok_or_else(|| DeployError::MissingInput {
            what: String::from("certificate"),
        })?;
        Ok(DeploymentParams {
            device: self.device.clone(),
            old_cert_name: self.old_cert_name.clone(),
            certificate,
            options: self.options.clone(),
            selected_profiles: self.selected_profiles.clone(),
        })
    }

    async fn build_plan(&mut self) -> Result<DeploymentPlan> {
        let params = self.params()?;

        if self.snapshot.is_none() {
            if self.old_cert_name.is_some() {
                self.resolve_snapshot().await?;
            } else {
                debug!("No certificate to replace; nothing references the new object yet");
                self.snapshot = Some(ImpactSnapshot::from_live(Vec::new()));
            }
        }
        let snapshot = self
            .snapshot
            .clone()
            .unwrap_or_else(|| ImpactSnapshot::unavailable("Impact preview was superseded"));

        self.planner
            .plan(&params, self.validated.as_ref(), &snapshot)
            .await
    }

    async fn live_check(&self, plan: &DeploymentPlan) -> LiveCheck {
        let Some(cert_name) = self.old_cert_name.clone() else {
            return LiveCheck::Clean;
        };

        let mut query = ImpactQuery::live(self.device.id, cert_name).with_timeout(self.live_timeout);
        query.partition.clone_from(&self.options.partition);

        match self.resolver.resolve(&query).await {
            Ok(ResolveOutcome::Resolved(live)) if live.is_available() => {
                let report = DriftDetector::diff(&plan.snapshot.profiles, &live.profiles);
                if report.has_drift() {
                    LiveCheck::Drift(report)
                } else {
                    debug!(
                        "Live impact matches plan snapshot [{}]",
                        SnapshotHasher::new().short_hash(&live.digest())
                    );
                    LiveCheck::Clean
                }
            }
            Ok(ResolveOutcome::Resolved(live)) => LiveCheck::Failed(
                live.advisory
                    .unwrap_or_else(|| String::from("Live impact data unavailable")),
            ),
            Ok(ResolveOutcome::Superseded) => {
                LiveCheck::Failed(String::from("Live impact check was superseded"))
            }
            Err(e) => LiveCheck::Failed(e.to_string()),
        }
    }

    async fn run_execute(&mut self, plan: DeploymentPlan) -> Result<SubmitOutcome> {
        let mut params = self.params()?;
        params.options.new_object_name = Some(plan.derived_new_object_name.clone());

        let authorization = self.gate.authorization()?;

        let result = self
            .executor
            .execute(
                &params,
                self.validated.as_ref(),
                &plan.profiles_to_update,
                authorization,
            )
            .await;

        self.gate.apply(GateEvent::ExecutionFinished)?;

        let report = result?;
        self.last_deployed = Some(report.result.new_cert_object_name.clone());
        self.snapshot = None;
        Ok(SubmitOutcome::Deployed { plan, report })
    }
}

enum LiveCheck {
    Clean,
    Drift(DriftReport),
    Failed(String),
}
