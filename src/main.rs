//! Certflow CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use certflow::cli::{
    Cli, Commands, DeployOptionArgs, MaterialArgs, OutputFormatter, Status, TargetArgs,
};
use certflow::config::{ConfigParser, ConfigValidator, EngineConfig, find_config_file};
use certflow::deploy::{
    CertificateInput, CertificateValidator, ChainOptions, RescanTrigger, VerificationProbe,
};
use certflow::error::{CertflowError, ConfigError, Result};
use certflow::gateway::{ApplianceClient, ApplianceGateway, CertificateMaterial, DeviceRef};
use certflow::impact::{DriftDetector, ImpactSnapshot, ProfileRef};
use certflow::journal::{
    JournalEntry, JournalStore, LocalJournal, RunOutcome, generate_holder_id, lock_target,
};
use certflow::retry::RetryPolicy;
use certflow::session::{DeploymentSession, SessionSettings, SubmitOutcome};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long the CLI waits for the cache refresh before exiting.
const RESCAN_GRACE: Duration = Duration::from_secs(10);

/// Exit code when a run needs operator attention (drift, blocked deploy).
const EXIT_ATTENTION: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr so JSON output on
/// stdout stays machine-readable.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config { warnings } => cmd_config(config_path, warnings, formatter),
        Commands::Validate { material } => {
            let ctx = Context::load(config_path)?;
            cmd_validate(&ctx, &material, formatter).await
        }
        Commands::Preview { target, live, timeout } => {
            let ctx = Context::load(config_path)?;
            cmd_preview(&ctx, &target, live, timeout, formatter).await
        }
        Commands::Plan { target, material, options } => {
            let ctx = Context::load(config_path)?;
            cmd_plan(&ctx, &target, &material, &options, formatter).await
        }
        Commands::Deploy {
            target,
            material,
            options,
            accept_drift,
            yes,
            no_verify,
        } => {
            let ctx = Context::load(config_path)?;
            let flags = DeployFlags {
                accept_drift,
                yes,
                verify: !no_verify,
            };
            cmd_deploy(&ctx, &target, &material, &options, flags, formatter).await
        }
        Commands::Verify {
            device_id,
            object,
            fingerprint,
        } => {
            let ctx = Context::load(config_path)?;
            cmd_verify(&ctx, device_id, &object, fingerprint.as_deref(), formatter).await
        }
        Commands::Rescan { device_ids, full } => {
            let ctx = Context::load(config_path)?;
            cmd_rescan(&ctx, &device_ids, full, formatter).await
        }
        Commands::Drift { before, after } => cmd_drift(&before, &after, formatter),
        Commands::History { device_id, limit } => {
            let config = load_config(config_path)?;
            cmd_history(&config, device_id, limit, formatter).await
        }
        Commands::Unlock {
            device_id,
            cert,
            force,
        } => {
            let config = load_config(config_path)?;
            cmd_unlock(&config, device_id, &cert, force, formatter).await
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Check the configuration file.
fn cmd_config(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let config = load_unvalidated(config_path)?;
    let result = ConfigValidator::new().collect(&config);

    emit(&formatter.format_config_check(&result, show_warnings))?;
    if !formatter.is_json() {
        emit(&format!(
            "\n   API: {}\n   Live probe: {}s\n   Chain: {}\n   Journal: {}",
            config.api.base_url,
            config.timeouts.live_probe_clamped(),
            config.deploy.chain_name,
            config.journal.resolved_path().display()
        ))?;
    }

    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Validate certificate material.
async fn cmd_validate(
    ctx: &Context,
    material: &MaterialArgs,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let Some(CertificateInput::Material(material)) = load_certificate(material)? else {
        return Err(CertflowError::internal(
            "Provide --pfx or --cert/--key to validate",
        ));
    };

    let validator = CertificateValidator::new(Arc::clone(&ctx.gateway), ctx.retry());
    let validated = validator.validate(&material).await?;
    emit(&formatter.format_validation(&validated))?;
    Ok(ExitCode::SUCCESS)
}

/// Show the profiles affected by replacing a certificate.
async fn cmd_preview(
    ctx: &Context,
    target: &TargetArgs,
    live: bool,
    timeout: Option<u64>,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let mut settings = SessionSettings::from(&ctx.config);
    settings.prefer_cache = !live;
    if let Some(secs) = timeout {
        settings.live_timeout = Duration::from_secs(secs);
    }

    let mut session = DeploymentSession::new(Arc::clone(&ctx.gateway), device(target), settings);
    if let Some(old) = &target.old_cert {
        session.set_old_certificate(old, target.certificate_id);
    }

    match session.preview().await? {
        Some(snapshot) => {
            emit(&formatter.format_snapshot(snapshot))?;
            Ok(if snapshot.is_available() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_ATTENTION)
            })
        }
        None => Err(CertflowError::internal("Impact preview was superseded")),
    }
}

/// Build a plan without changing anything.
async fn cmd_plan(
    ctx: &Context,
    target: &TargetArgs,
    material: &MaterialArgs,
    options: &DeployOptionArgs,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let (mut session, mode) = open_session(ctx, target, material, options)?;
    prepare(&mut session, formatter).await?;

    let SubmitOutcome::Planned(plan) = session.submit().await? else {
        return Err(CertflowError::internal("Dry run did not produce a plan"));
    };
    emit(&formatter.format_plan(&plan))?;

    let entry = JournalEntry::new(session.device(), mode, RunOutcome::Planned)
        .with_old_cert(plan.old_cert_name.as_deref())
        .with_object(&plan.derived_new_object_name)
        .with_profiles(plan.profiles_to_update.clone());
    record(&ctx.journal, entry).await;

    Ok(ExitCode::SUCCESS)
}

/// Flags of the deploy command.
#[derive(Debug, Clone, Copy)]
struct DeployFlags {
    accept_drift: bool,
    yes: bool,
    verify: bool,
}

/// Plan, gate and deploy.
async fn cmd_deploy(
    ctx: &Context,
    target: &TargetArgs,
    material: &MaterialArgs,
    options: &DeployOptionArgs,
    flags: DeployFlags,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let (mut session, mode) = open_session(ctx, target, material, options)?;
    prepare(&mut session, formatter).await?;

    let SubmitOutcome::Planned(plan) = session.submit().await? else {
        return Err(CertflowError::internal("Dry run did not produce a plan"));
    };
    emit(&formatter.format_plan(&plan))?;

    if !flags.yes
        && !confirm(&format!(
            "Deploy '{}' to {}?",
            plan.derived_new_object_name,
            session.device()
        ))?
    {
        emit(&formatter.message(Status::Warning, "Deployment cancelled"))?;
        return Ok(ExitCode::SUCCESS);
    }

    let lock_key = lock_target(
        target.device_id,
        plan.old_cert_name
            .as_deref()
            .unwrap_or(&plan.derived_new_object_name),
    );
    let lock = ctx
        .journal
        .acquire_lock(&lock_key, &generate_holder_id())
        .await?;

    let outcome = execute_gated(&mut session, flags, formatter).await;

    if let Err(e) = ctx.journal.release_lock(&lock).await {
        warn!("Failed to release deployment lock {lock_key}: {e}");
    }

    let base_entry = |outcome| {
        JournalEntry::new(session.device(), mode, outcome)
            .with_old_cert(plan.old_cert_name.as_deref())
    };

    match outcome {
        Ok((SubmitOutcome::Deployed { report, .. }, drift_accepted)) => {
            emit(&formatter.format_result(&report.result))?;

            let run_outcome = if report.result.is_partial() {
                RunOutcome::Partial
            } else {
                RunOutcome::Deployed
            };
            let entry = base_entry(run_outcome)
                .with_object(&report.result.new_cert_object_name)
                .with_profiles(report.result.updated_profiles.clone())
                .with_drift_accepted(drift_accepted);
            record(&ctx.journal, entry).await;

            if flags.verify {
                match session.verify(None).await {
                    Ok(result) => emit(&formatter.format_verification(&result, None))?,
                    Err(e) => emit(&formatter.message(
                        Status::Warning,
                        &format!("Deployed, but read-back failed: {e}"),
                    ))?,
                }
            }

            match report.rescan.wait(RESCAN_GRACE).await {
                Some(true) => debug!("Cache refresh acknowledged"),
                Some(false) => warn!("Cache refresh failed; inventory may be stale"),
                None => warn!("Cache refresh still running after {}s", RESCAN_GRACE.as_secs()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok((SubmitOutcome::ConfirmationRequired { .. }, _)) => {
            record(&ctx.journal, base_entry(RunOutcome::Blocked)).await;
            emit(&formatter.message(
                Status::Warning,
                "Not deployed: impact changed since planning. Re-run with --accept-drift to proceed.",
            ))?;
            Ok(ExitCode::from(EXIT_ATTENTION))
        }
        Ok((SubmitOutcome::Planned(_), _)) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            record(&ctx.journal, base_entry(RunOutcome::Failed).with_error(e.to_string())).await;
            Err(e)
        }
    }
}

/// Runs the execute submission, asking for a second confirmation when the
/// live check finds drift or fails. Returns the outcome and whether drift was
/// accepted.
async fn execute_gated(
    session: &mut DeploymentSession,
    flags: DeployFlags,
    formatter: OutputFormatter,
) -> Result<(SubmitOutcome, bool)> {
    session.set_dry_run(false);
    let outcome = session.submit().await?;

    let SubmitOutcome::ConfirmationRequired { drift, warning, .. } = &outcome else {
        return Ok((outcome, false));
    };

    if let Some(report) = drift {
        emit(&formatter.format_drift(report))?;
    }
    if let Some(message) = warning {
        emit(&formatter.message(
            Status::Warning,
            &format!("Live impact check failed: {message}"),
        ))?;
    }

    let proceed = flags.accept_drift
        || (!flags.yes && confirm("The impact is not confirmed. Deploy anyway?")?);
    if !proceed {
        return Ok((outcome, false));
    }

    info!("Operator accepted unconfirmed impact");
    Ok((session.submit().await?, true))
}

/// Read back an installed object.
async fn cmd_verify(
    ctx: &Context,
    device_id: u64,
    object: &str,
    fingerprint: Option<&str>,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let device = DeviceRef::new(device_id, format!("device-{device_id}"), "");
    let probe = VerificationProbe::new(Arc::clone(&ctx.gateway), ctx.retry());
    let result = probe.verify(&device, object).await?;

    emit(&formatter.format_verification(&result, fingerprint))?;
    Ok(match fingerprint {
        Some(f) if !result.matches_fingerprint(f) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

/// Ask the backend to refresh its inventory cache.
async fn cmd_rescan(
    ctx: &Context,
    device_ids: &[u64],
    full: bool,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let trigger = RescanTrigger::new(Arc::clone(&ctx.gateway));
    let grace = Duration::from_secs(ctx.config.api.request_timeout_secs);

    let handles: Vec<_> = device_ids
        .iter()
        .map(|id| {
            let device = DeviceRef::new(*id, format!("device-{id}"), "");
            (*id, trigger.fire(&device, !full))
        })
        .collect();

    let mut failed = false;
    for (id, handle) in handles {
        let (status, message) = match handle.wait(grace).await {
            Some(true) => (Status::Success, format!("Refresh requested for device {id}")),
            Some(false) => (Status::Error, format!("Refresh failed for device {id}")),
            None => (Status::Warning, format!("Refresh for device {id} still pending")),
        };
        failed |= status == Status::Error;
        emit(&formatter.message(status, &message))?;
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Compare two saved snapshots.
fn cmd_drift(before: &Path, after: &Path, formatter: OutputFormatter) -> Result<ExitCode> {
    let before = read_profiles(before)?;
    let after = read_profiles(after)?;

    let report = DriftDetector::diff(&before, &after);
    emit(&formatter.format_drift(&report))?;

    Ok(if report.has_drift() {
        ExitCode::from(EXIT_ATTENTION)
    } else {
        ExitCode::SUCCESS
    })
}

/// Show the local journal.
async fn cmd_history(
    config: &EngineConfig,
    device_id: Option<u64>,
    limit: usize,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let journal = LocalJournal::from_config(&config.journal).load().await?;
    emit(&formatter.format_history(&journal.recent(device_id, limit)))?;
    Ok(ExitCode::SUCCESS)
}

/// Show or remove a deployment lock.
async fn cmd_unlock(
    config: &EngineConfig,
    device_id: u64,
    cert: &str,
    force: bool,
    formatter: OutputFormatter,
) -> Result<ExitCode> {
    let journal = LocalJournal::from_config(&config.journal);
    let key = lock_target(device_id, cert);

    let Some(lock) = journal.lock_info(&key).await? else {
        emit(&formatter.message(Status::Success, &format!("No lock held for {key}")))?;
        return Ok(ExitCode::SUCCESS);
    };

    if force || lock.is_expired() {
        journal.force_unlock(&key).await?;
        emit(&formatter.message(Status::Success, &format!("Removed lock for {key}")))?;
        return Ok(ExitCode::SUCCESS);
    }

    emit(&formatter.message(
        Status::Warning,
        &format!(
            "{key} is locked by {} since {} ({}s left). Use --force to remove it.",
            lock.holder,
            lock.acquired_at.to_rfc3339(),
            lock.remaining_secs()
        ),
    ))?;
    Ok(ExitCode::from(EXIT_ATTENTION))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loaded configuration and backend connection.
struct Context {
    config: EngineConfig,
    gateway: Arc<dyn ApplianceGateway>,
    journal: LocalJournal,
}

impl Context {
    fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let token = ConfigParser::api_token(&config);
        if token.is_none() {
            warn!("{} is not set; requests are unauthenticated", config.api.token_env);
        }
        let gateway: Arc<dyn ApplianceGateway> =
            Arc::new(ApplianceClient::from_config(&config, token)?);
        let journal = LocalJournal::from_config(&config.journal);

        Ok(Self {
            config,
            gateway,
            journal,
        })
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.retry)
    }
}

/// Loads and validates configuration. Missing files fall back to defaults.
fn load_config(config_path: Option<&Path>) -> Result<EngineConfig> {
    let config = load_unvalidated(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("Config: {warning}");
    }
    Ok(config)
}

fn load_unvalidated(config_path: Option<&Path>) -> Result<EngineConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => match find_config_file(".") {
            Ok(path) => Some(path),
            Err(CertflowError::Config(ConfigError::FileNotFound { .. })) => None,
            Err(e) => return Err(e),
        },
    };

    let base = config_file
        .as_deref()
        .and_then(Path::parent)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    match config_file {
        Some(path) => {
            debug!("Loading configuration from: {}", path.display());
            parser.load_with_env(&path)
        }
        None => {
            debug!("No configuration file found, using defaults");
            Ok(parser.defaults_with_env())
        }
    }
}

fn device(target: &TargetArgs) -> DeviceRef {
    let hostname = target
        .hostname
        .clone()
        .unwrap_or_else(|| format!("device-{}", target.device_id));
    DeviceRef::new(target.device_id, hostname, "")
}

/// Builds a session from CLI arguments. Returns it with the material mode.
fn open_session(
    ctx: &Context,
    target: &TargetArgs,
    material: &MaterialArgs,
    options: &DeployOptionArgs,
) -> Result<(DeploymentSession, &'static str)> {
    let certificate = load_certificate(material)?.ok_or_else(|| {
        CertflowError::internal("Provide --pfx, --cert/--key or --reference")
    })?;
    let mode = certificate.mode();

    let mut session = DeploymentSession::new(
        Arc::clone(&ctx.gateway),
        device(target),
        SessionSettings::from(&ctx.config),
    );
    if let Some(old) = &target.old_cert {
        session.set_old_certificate(old, target.certificate_id);
    }
    match certificate {
        CertificateInput::Material(material) => session.set_material(material),
        CertificateInput::Reference { object_name } => session.set_reference(object_name),
    }
    session.set_options(chain_options(&ctx.config, options));
    if !options.profiles.is_empty() {
        session.select_profiles(Some(options.profiles.clone()));
    }

    Ok((session, mode))
}

/// Validates the certificate and shows the impact preview.
async fn prepare(session: &mut DeploymentSession, formatter: OutputFormatter) -> Result<()> {
    if session.validated().is_none() && session.certificate().is_some() {
        let validated = session.validate().await?;
        emit(&formatter.format_validation(validated))?;
    }

    if let Ok(Some(snapshot)) = session.preview().await.map_err(|e| debug!("No preview: {e}")) {
        emit(&formatter.format_snapshot(snapshot))?;
    }
    Ok(())
}

fn chain_options(config: &EngineConfig, args: &DeployOptionArgs) -> ChainOptions {
    let mut options = ChainOptions::from(&config.deploy);
    if let Some(chain) = &args.chain_name {
        options.chain_name.clone_from(chain);
    }
    if args.no_chain_from_pfx {
        options.install_chain_from_pfx = false;
    }
    if args.no_profile_update {
        options.update_profiles = false;
    }
    if let Some(partition) = &args.partition {
        options.partition.clone_from(partition);
    }
    options.new_object_name.clone_from(&args.new_object_name);
    options
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| CertflowError::internal(format!("Cannot read {}: {e}", path.display())))
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = read_file(path)?;
    String::from_utf8(bytes)
        .map_err(|_| CertflowError::internal(format!("{} is not valid UTF-8", path.display())))
}

fn load_certificate(args: &MaterialArgs) -> Result<Option<CertificateInput>> {
    if let Some(path) = &args.pfx {
        return Ok(Some(CertificateInput::Material(CertificateMaterial::Pfx {
            data: read_file(path)?,
            password: args.password.clone(),
        })));
    }

    if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
        let chain_pem = args.chain.as_deref().map(read_text).transpose()?;
        return Ok(Some(CertificateInput::Material(CertificateMaterial::Pem {
            cert_pem: read_text(cert)?,
            key_pem: read_text(key)?,
            chain_pem,
        })));
    }

    Ok(args
        .reference
        .as_ref()
        .map(|name| CertificateInput::Reference {
            object_name: name.clone(),
        }))
}

/// Reads a saved snapshot: either a full snapshot object or a bare list of
/// profiles.
fn read_profiles(path: &Path) -> Result<Vec<ProfileRef>> {
    let content = read_text(path)?;
    if let Ok(snapshot) = serde_json::from_str::<ImpactSnapshot>(&content) {
        return Ok(snapshot.profiles);
    }
    serde_json::from_str(&content).map_err(|e| {
        CertflowError::internal(format!("{} is not a snapshot: {e}", path.display()))
    })
}

async fn record(journal: &LocalJournal, entry: JournalEntry) {
    if let Err(e) = journal.record(entry).await {
        warn!("Failed to write journal: {e}");
    }
}

fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{text}")?;
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
