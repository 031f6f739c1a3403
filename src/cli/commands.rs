//! CLI command definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Certflow - drift-aware certificate deployment for load balancers.
#[derive(Parser, Debug)]
#[command(name = "certflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "CERTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the configuration file.
    Config {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Validate certificate material with the backend.
    Validate {
        /// Certificate material.
        #[command(flatten)]
        material: MaterialArgs,
    },

    /// Show which profiles and VIPs reference a certificate.
    Preview {
        /// Deployment target.
        #[command(flatten)]
        target: TargetArgs,

        /// Skip the inventory cache and query the device.
        #[arg(long)]
        live: bool,

        /// Live probe deadline in seconds (clamped to 10-60).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Build a deployment plan without changing anything.
    Plan {
        /// Deployment target.
        #[command(flatten)]
        target: TargetArgs,

        /// Certificate material.
        #[command(flatten)]
        material: MaterialArgs,

        /// Chain and profile options.
        #[command(flatten)]
        options: DeployOptionArgs,
    },

    /// Plan, check for drift, and deploy.
    Deploy {
        /// Deployment target.
        #[command(flatten)]
        target: TargetArgs,

        /// Certificate material.
        #[command(flatten)]
        material: MaterialArgs,

        /// Chain and profile options.
        #[command(flatten)]
        options: DeployOptionArgs,

        /// Proceed when the live check finds drift or cannot complete.
        #[arg(long)]
        accept_drift: bool,

        /// Skip confirmation prompts.
        #[arg(short, long)]
        yes: bool,

        /// Skip the post-deployment read-back.
        #[arg(long)]
        no_verify: bool,
    },

    /// Read back an installed certificate object.
    Verify {
        /// Device inventory id.
        #[arg(long)]
        device_id: u64,

        /// Certificate object name.
        object: String,

        /// Expected SHA-256 fingerprint.
        #[arg(long)]
        fingerprint: Option<String>,
    },

    /// Ask the backend to refresh its inventory cache.
    Rescan {
        /// Device inventory ids.
        #[arg(long = "device-id", required = true)]
        device_ids: Vec<u64>,

        /// Full rescan instead of the fast path.
        #[arg(long)]
        full: bool,
    },

    /// Compare two saved impact snapshots.
    Drift {
        /// Earlier snapshot (JSON).
        before: PathBuf,

        /// Later snapshot (JSON).
        after: PathBuf,
    },

    /// Show the local deployment journal.
    History {
        /// Only show runs against this device.
        #[arg(long)]
        device_id: Option<u64>,

        /// Number of entries to show.
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show or remove a deployment lock.
    Unlock {
        /// Device inventory id.
        #[arg(long)]
        device_id: u64,

        /// Certificate the lock guards.
        #[arg(long)]
        cert: String,

        /// Remove the lock regardless of holder.
        #[arg(long)]
        force: bool,
    },
}

/// Device and certificate being replaced.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Device inventory id.
    #[arg(long)]
    pub device_id: u64,

    /// Device hostname, for display.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Name of the certificate being replaced.
    #[arg(long)]
    pub old_cert: Option<String>,

    /// Inventory id of the certificate being replaced (enables the cache).
    #[arg(long)]
    pub certificate_id: Option<u64>,
}

/// New certificate material: a PFX bundle, PEM files, or an existing object.
#[derive(Args, Debug, Clone, Default)]
pub struct MaterialArgs {
    /// PKCS#12 bundle.
    #[arg(long, conflicts_with_all = ["cert", "key", "reference"])]
    pub pfx: Option<PathBuf>,

    /// PFX password.
    #[arg(long, env = "CERTFLOW_PFX_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// PEM certificate.
    #[arg(long, requires = "key", conflicts_with = "reference")]
    pub cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// PEM chain.
    #[arg(long, requires = "cert")]
    pub chain: Option<PathBuf>,

    /// Existing certificate object on the device.
    #[arg(long)]
    pub reference: Option<String>,
}

/// Chain and profile options.
#[derive(Args, Debug, Clone, Default)]
pub struct DeployOptionArgs {
    /// Chain certificate name.
    #[arg(long)]
    pub chain_name: Option<String>,

    /// Do not install the chain embedded in a PFX.
    #[arg(long)]
    pub no_chain_from_pfx: bool,

    /// Install the certificate without repointing profiles.
    #[arg(long)]
    pub no_profile_update: bool,

    /// Partition for created objects.
    #[arg(long)]
    pub partition: Option<String>,

    /// Explicit name for the new object.
    #[arg(long)]
    pub new_object_name: Option<String>,

    /// Only update these profiles (`partition/name`, comma separated).
    #[arg(long, value_delimiter = ',')]
    pub profiles: Vec<String>,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_deploy_arguments() {
        let cli = Cli::try_parse_from([
            "certflow",
            "--output",
            "json",
            "deploy",
            "--device-id",
            "7",
            "--old-cert",
            "www_example_com_2025",
            "--pfx",
            "bundle.pfx",
            "--profiles",
            "Common/a,Common/b",
            "--accept-drift",
        ])
        .expect("parses");

        assert_eq!(cli.output, OutputFormat::Json);
        let Commands::Deploy { target, material, options, accept_drift, yes, .. } = cli.command
        else {
            panic!("expected deploy");
        };
        assert_eq!(target.device_id, 7);
        assert_eq!(material.pfx, Some(PathBuf::from("bundle.pfx")));
        assert_eq!(options.profiles, vec!["Common/a", "Common/b"]);
        assert!(accept_drift);
        assert!(!yes);
    }

    #[test]
    fn test_material_sources_conflict() {
        let result = Cli::try_parse_from([
            "certflow", "validate", "--pfx", "a.pfx", "--reference", "obj",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from(["certflow", "validate", "--cert", "a.pem"]);
        assert!(result.is_err(), "--cert requires --key");
    }
}
