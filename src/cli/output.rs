//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::backend::ObservedUser;
use crate::config::{OperatorConfig, ValidationResult};
use crate::controller::TickSummary;
use crate::planner::{OperationKind, ReconcilePlan, SpecHasher};
use crate::reconciler::{DriftReport, ReconcileOutcome};
use crate::store::{ResourceKey, UserPhase, UserResource};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// User resource row for table display.
#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Last sync")]
    last_sync: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Pool user row for table display.
#[derive(Tabled)]
struct PoolUserRow {
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Change")]
    change: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a reconcile plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ReconcilePlan) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => {
                if plan.is_empty() {
                    return format!("{} {} is up to date.\n", "✓".green(), plan.key);
                }

                let mut output = String::new();
                let _ = writeln!(output, "\nPlan for {}", plan.key.to_string().bold());
                let _ = writeln!(
                    output,
                    "   Spec hash: {}\n",
                    SpecHasher::new().short_hash(&plan.spec_hash)
                );

                let rows: Vec<OperationRow> = plan
                    .operations
                    .iter()
                    .enumerate()
                    .map(|(i, op)| OperationRow {
                        index: i + 1,
                        operation: Self::format_operation(op.kind),
                        user: op.user.name.clone(),
                        change: op
                            .details
                            .iter()
                            .map(|d| {
                                format!(
                                    "{}: {} -> {}",
                                    d.field,
                                    d.old_value.as_deref().unwrap_or("-"),
                                    d.new_value.as_deref().unwrap_or("-")
                                )
                            })
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats the outcome of a single pass.
    #[must_use]
    pub fn format_outcome(&self, key: &ResourceKey, outcome: &ReconcileOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "key": key.to_string(),
                "outcome": outcome,
            })),
            OutputFormat::Text => format!("{} {key}: {outcome}\n", "✓".green()),
        }
    }

    /// Formats user resources with their status.
    #[must_use]
    pub fn format_users(&self, users: &[UserResource]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&users),
            OutputFormat::Text => {
                if users.is_empty() {
                    return String::from("   No users in the store.\n");
                }

                let rows: Vec<UserRow> = users
                    .iter()
                    .map(|u| {
                        let status = u.status_or_default();
                        let phase = if u.is_being_deleted() && status.phase != UserPhase::Error {
                            UserPhase::Deleting
                        } else {
                            status.phase
                        };
                        UserRow {
                            key: u.key.to_string(),
                            email: u.spec.email().to_string(),
                            enabled: Self::format_enabled(u.spec.enabled()),
                            phase: Self::format_phase(phase),
                            last_sync: status
                                .last_sync_time
                                .map_or_else(|| String::from("-"), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                            error: status
                                .last_error
                                .as_deref()
                                .map_or_else(String::new, |e| Self::truncate(e, 50)),
                        }
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats pool users.
    #[must_use]
    pub fn format_pool(&self, users: &[ObservedUser]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&users),
            OutputFormat::Text => {
                if users.is_empty() {
                    return String::from("   The pool is empty.\n");
                }

                let rows: Vec<PoolUserRow> = users
                    .iter()
                    .map(|u| PoolUserRow {
                        username: u.username.clone(),
                        email: u.email.clone(),
                        enabled: Self::format_enabled(u.enabled),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let _ = writeln!(output, "\n{} users", users.len());
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_clean() {
                    return format!(
                        "{} No drift detected ({} users in the pool).\n",
                        "✓".green(),
                        report.pool_size
                    );
                }

                let mut output = format!("{} Drift detected:\n", "⚠".yellow());
                for key in &report.missing {
                    let _ = writeln!(output, "   {} {key}", "missing  ".red());
                }
                for entry in &report.drifted {
                    let ops: Vec<String> =
                        entry.operations.iter().map(ToString::to_string).collect();
                    let _ = writeln!(
                        output,
                        "   {} {} ({})",
                        "drifted  ".yellow(),
                        entry.key,
                        ops.join("; ")
                    );
                }
                for user in &report.unmanaged {
                    let _ = writeln!(output, "   {} {user}", "unmanaged".dimmed());
                }
                let _ = writeln!(
                    output,
                    "\n{} missing, {} drifted, {} unmanaged ({} pages, {} duplicates dropped)",
                    report.missing.len(),
                    report.drifted.len(),
                    report.unmanaged.len(),
                    report.pages_fetched,
                    report.duplicates_dropped
                );
                output
            }
        }
    }

    /// Formats the summary of one resync.
    #[must_use]
    pub fn format_tick(&self, summary: &TickSummary) -> String {
        match self.format {
            OutputFormat::Json => to_json(summary),
            OutputFormat::Text => format!(
                "Resync: {} succeeded, {} failed, {} backing off, {} cancelled\n",
                summary.succeeded.to_string().green(),
                summary.failed.to_string().red(),
                summary.backing_off.to_string().yellow(),
                summary.cancelled
            ),
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &OperatorConfig,
        result: &ValidationResult,
        manifests: Option<usize>,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": true,
                "backend": config.backend.kind.to_string(),
                "manifests": manifests,
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid.\n", "✓".green());
                let _ = writeln!(output, "   Backend: {}", config.backend.kind);
                if let Some(pool) = &config.backend.user_pool_id {
                    let _ = writeln!(output, "   User pool: {pool}");
                }
                let _ = writeln!(
                    output,
                    "   Resync: every {}s, {} at a time",
                    config.controller.resync_interval_secs, config.controller.max_concurrency
                );
                if let Some(count) = manifests {
                    let _ = writeln!(output, "   Manifests: {count} users");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a one-line message.
    #[must_use]
    pub fn format_message(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": "success", "message": message })),
            OutputFormat::Text => format!("{} {message}\n", "✓".green()),
        }
    }

    /// Formats an error message.
    #[must_use]
    pub fn format_error(&self, message: &str, retry_in_secs: Option<u64>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "status": "error",
                "message": message,
                "retry_in_secs": retry_in_secs,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} {message}\n", "✗".red());
                if let Some(secs) = retry_in_secs {
                    let _ = writeln!(output, "   Transient failure; retry in about {secs}s.");
                }
                output
            }
        }
    }

    /// Formats an operation kind with color.
    fn format_operation(kind: OperationKind) -> String {
        match kind {
            OperationKind::Create => "+create".green().to_string(),
            OperationKind::UpdateAttributes => "~update-attributes".yellow().to_string(),
            OperationKind::Enable => "~enable".yellow().to_string(),
            OperationKind::Disable => "~disable".yellow().to_string(),
            OperationKind::Delete => "-delete".red().to_string(),
        }
    }

    /// Formats a lifecycle phase with color.
    fn format_phase(phase: UserPhase) -> String {
        match phase {
            UserPhase::Synced => "Synced".green().to_string(),
            UserPhase::Pending => "Pending".yellow().to_string(),
            UserPhase::Deleting => "Deleting".yellow().to_string(),
            UserPhase::Error => "Error".red().to_string(),
        }
    }

    fn format_enabled(enabled: bool) -> String {
        if enabled {
            "yes".green().to_string()
        } else {
            "no".dimmed().to_string()
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default() + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DesiredUser;
    use crate::store::UserSpec;

    #[test]
    fn test_plan_json() {
        let key = ResourceKey::parse("alice");
        let plan = ReconcilePlan::build(&key, &DesiredUser::new("alice", "a@x.com", false), None, false);
        let output = OutputFormatter::new(OutputFormat::Json).format_plan(&plan);

        let value: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(value["operations"][0]["kind"], "create");
        assert_eq!(value["operations"][1]["kind"], "disable");
        assert_eq!(value["key"]["name"], "alice");
    }

    #[test]
    fn test_users_text_table() {
        colored::control::set_override(false);
        let resource = UserResource::new(
            ResourceKey::parse("team/alice"),
            UserSpec {
                email: Some(String::from("a@x.com")),
                enabled: None,
            },
        );
        let output = OutputFormatter::new(OutputFormat::Text).format_users(&[resource]);
        assert!(output.contains("team/alice"));
        assert!(output.contains("Pending"));
    }

    #[test]
    fn test_outcome_json() {
        let output = OutputFormatter::new(OutputFormat::Json).format_outcome(
            &ResourceKey::parse("alice"),
            &ReconcileOutcome::Synced {
                applied: vec![OperationKind::Create],
            },
        );
        let value: serde_json::Value = serde_json::from_str(&output).expect("json");
        assert_eq!(value["outcome"]["result"], "synced");
        assert_eq!(value["outcome"]["applied"][0], "create");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a long message here", 10), "a long ...");
    }
}
