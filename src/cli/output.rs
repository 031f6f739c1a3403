//! Output formatting for CLI commands.
//!
//! Text output uses tables and colored markers. JSON output serializes the
//! library types directly.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::deploy::{DeploymentPlan, DeploymentResult, ValidatedCertificate};
use crate::gateway::VerificationResult;
use crate::impact::{DriftReport, ImpactSnapshot, SnapshotSource};
use crate::journal::{JournalEntry, RunOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    format: OutputFormat,
}

/// Profile row for impact tables.
#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Profile")]
    profile: String,
    #[tabled(rename = "Context")]
    context: String,
    #[tabled(rename = "VIPs")]
    vips: String,
}

/// History row.
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Old")]
    old: String,
    #[tabled(rename = "New")]
    new: String,
    #[tabled(rename = "Profiles")]
    profiles: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// True when emitting JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn json<T: Serialize + ?Sized>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats configuration check results.
    #[must_use]
    pub fn format_config_check(&self, result: &ValidationResult, show_warnings: bool) -> String {
        if self.is_json() {
            let errors: Vec<_> = result
                .errors
                .iter()
                .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                .collect();
            return Self::json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": errors,
                "warnings": result.warnings,
            }));
        }

        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Configuration is valid", "✓".green());
        } else {
            let _ = writeln!(output, "{} Configuration has errors:", "✗".red());
            for error in &result.errors {
                let _ = writeln!(output, "   - {}: {}", error.field, error.message);
            }
        }
        if show_warnings && !result.warnings.is_empty() {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }
        output
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, validated: &ValidatedCertificate) -> String {
        if self.is_json() {
            return Self::json(validated);
        }

        let attributes = &validated.attributes;
        let mut output = format!("{} Certificate accepted\n\n", "✓".green());
        let _ = writeln!(
            output,
            "   Common name: {}",
            attributes.common_name.as_deref().unwrap_or("(none)")
        );
        if !attributes.san.is_empty() {
            let _ = writeln!(output, "   SAN: {}", attributes.san.join(", "));
        }
        let expiry = attributes
            .not_after
            .map_or_else(|| String::from("unknown"), |t| t.format("%Y-%m-%d").to_string());
        let _ = writeln!(output, "   Expires: {expiry}");

        for warning in &validated.warnings {
            let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
        }
        output
    }

    /// Formats an impact snapshot.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &ImpactSnapshot) -> String {
        if self.is_json() {
            return Self::json(snapshot);
        }

        let source = match snapshot.source {
            SnapshotSource::Cache => "cache".cyan().to_string(),
            SnapshotSource::Live => "live".green().to_string(),
            SnapshotSource::None => "unavailable".red().to_string(),
        };
        let mut output = format!(
            "\nImpact ({source}, {})\n\n",
            snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if let Some(advisory) = &snapshot.advisory {
            let _ = writeln!(output, "{} {advisory}", "⚠".yellow());
            return output;
        }
        if snapshot.profiles.is_empty() {
            output.push_str("   No profiles reference this certificate.\n");
            return output;
        }

        let rows: Vec<ProfileRow> = snapshot
            .profiles
            .iter()
            .map(|p| ProfileRow {
                profile: p.key(),
                context: p.context.clone(),
                vips: p
                    .vips
                    .iter()
                    .map(|v| if v.enabled { v.name.clone() } else { format!("{} (disabled)", v.name) })
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats a deployment plan.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        if self.is_json() {
            return Self::json(plan);
        }

        let mut output = format!("\nDeployment plan for {}\n\n", plan.device);
        let _ = writeln!(
            output,
            "   Replacing: {}",
            plan.old_cert_name.as_deref().unwrap_or("(nothing)")
        );
        let _ = writeln!(output, "   New object: {}", plan.derived_new_object_name.bold());
        let _ = writeln!(output, "   Material: {}", plan.mode);
        let _ = writeln!(output, "   Chain: {}", plan.chain_name);
        let _ = writeln!(output, "   Impact from: {}\n", plan.snapshot.source);

        for (i, action) in plan.actions.iter().enumerate() {
            let _ = writeln!(output, "   {}. {action}", i + 1);
        }

        let _ = write!(
            output,
            "\nProfiles: {} detected, {} to update\n",
            plan.profiles_detected.len(),
            plan.profiles_to_update.len().to_string().yellow()
        );
        for profile in &plan.profiles_to_update {
            let _ = writeln!(output, "   ~ {profile}");
        }
        if let Some(advisory) = &plan.snapshot.advisory {
            let _ = writeln!(output, "\n{} {advisory}", "⚠".yellow());
        }
        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        if self.is_json() {
            return Self::json(report);
        }
        if !report.has_drift() {
            return format!("{} No drift detected.\n", "✓".green());
        }

        let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
        for key in &report.added {
            let _ = writeln!(output, "   {} {key}", "+".green());
        }
        for key in &report.removed {
            let _ = writeln!(output, "   {} {key}", "-".red());
        }
        for change in &report.vip_changed {
            let mut parts = Vec::new();
            if !change.added.is_empty() {
                parts.push(format!("+[{}]", change.added.join(", ")).green().to_string());
            }
            if !change.removed.is_empty() {
                parts.push(format!("-[{}]", change.removed.join(", ")).red().to_string());
            }
            let _ = writeln!(output, "   {} {} {}", "~".yellow(), change.key, parts.join(" "));
        }
        let _ = write!(output, "\n{} change(s).\n", report.change_count());
        output
    }

    /// Formats a deployment result.
    #[must_use]
    pub fn format_result(&self, result: &DeploymentResult) -> String {
        if self.is_json() {
            return Self::json(result);
        }

        let mut output = if result.is_partial() {
            format!("{} Deployed with partial profile updates\n\n", "⚠".yellow())
        } else {
            format!("{} Deployment complete\n\n", "✓".green())
        };
        let _ = writeln!(output, "   Object: {}", result.new_cert_object_name.bold());
        for profile in &result.updated_profiles {
            let _ = writeln!(output, "   {} {profile}", "✓".green());
        }
        for profile in &result.missing_profiles {
            let _ = writeln!(output, "   {} {profile} (not updated)", "✗".red());
        }
        output
    }

    /// Formats a read-back.
    #[must_use]
    pub fn format_verification(
        &self,
        result: &VerificationResult,
        expected_fingerprint: Option<&str>,
    ) -> String {
        if self.is_json() {
            let matches = expected_fingerprint.map(|f| result.matches_fingerprint(f));
            return Self::json(&serde_json::json!({ "result": result, "fingerprint_matches": matches }));
        }

        let mut output = format!("\nInstalled certificate\n\n   Subject: {}\n", result.subject);
        if !result.san.is_empty() {
            let _ = writeln!(output, "   SAN: {}", result.san.join(", "));
        }
        let _ = writeln!(output, "   SHA-256: {}", result.fingerprint_sha256);
        if let Some(version) = result.version {
            let _ = writeln!(output, "   Version: {version}");
        }
        match expected_fingerprint {
            Some(f) if result.matches_fingerprint(f) => {
                let _ = writeln!(output, "\n{} Fingerprint matches", "✓".green());
            }
            Some(_) => {
                let _ = writeln!(output, "\n{} Fingerprint does not match", "✗".red());
            }
            None => {}
        }
        output
    }

    /// Formats journal entries, newest first.
    #[must_use]
    pub fn format_history(&self, entries: &[&JournalEntry]) -> String {
        if self.is_json() {
            return Self::json(entries);
        }
        if entries.is_empty() {
            return String::from("No deployments recorded.\n");
        }

        let rows: Vec<HistoryRow> = entries
            .iter()
            .map(|e| HistoryRow {
                when: e.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                device: truncate(&e.hostname, 24),
                outcome: Self::format_outcome(e.outcome, e.drift_accepted),
                old: truncate(e.old_cert_name.as_deref().unwrap_or("-"), 28),
                new: truncate(e.new_object_name.as_deref().unwrap_or("-"), 28),
                profiles: e.profiles.len(),
            })
            .collect();
        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    fn format_outcome(outcome: RunOutcome, drift_accepted: bool) -> String {
        let text = match outcome {
            RunOutcome::Deployed => "deployed".green(),
            RunOutcome::Partial => "partial".yellow(),
            RunOutcome::Planned => "planned".dimmed(),
            RunOutcome::Blocked => "blocked".yellow(),
            RunOutcome::Failed => "failed".red(),
        };
        if drift_accepted {
            format!("{text} (drift accepted)")
        } else {
            text.to_string()
        }
    }

    /// Formats a one-line status message.
    #[must_use]
    pub fn message(&self, status: Status, message: &str) -> String {
        if self.is_json() {
            return Self::json(&serde_json::json!({ "status": status.as_str(), "message": message }));
        }
        let marker = match status {
            Status::Success => "✓".green(),
            Status::Warning => "⚠".yellow(),
            Status::Error => "✗".red(),
        };
        format!("{marker} {message}")
    }
}

/// Status of a one-line message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Completed.
    Success,
    /// Needs attention.
    Warning,
    /// Failed.
    Error,
}

impl Status {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
