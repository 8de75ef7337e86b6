//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Userpool - keeps an identity provider user pool in line with declared users.
#[derive(Parser, Debug)]
#[command(name = "userpool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "USERPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "USERPOOL_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted.
    Run {
        /// Run a single resync and exit.
        #[arg(long)]
        once: bool,
    },

    /// Reconcile one user now.
    Reconcile {
        /// Resource key (`namespace/name` or `name`).
        key: String,
    },

    /// Show the operations a reconcile would apply.
    Plan {
        /// Resource key (`namespace/name` or `name`).
        key: String,
    },

    /// Apply `User` manifests to the store.
    Apply {
        /// Manifest file (multi-document YAML).
        #[arg(short, long)]
        file: PathBuf,

        /// Reconcile the applied users right away.
        #[arg(long)]
        reconcile: bool,
    },

    /// Request deletion of a user.
    Delete {
        /// Resource key (`namespace/name` or `name`).
        key: String,

        /// Run the finalizing pass right away.
        #[arg(long)]
        reconcile: bool,
    },

    /// Show users in the store with their status.
    Get {
        /// Resource key; all users if omitted.
        key: Option<String>,
    },

    /// List every user in the pool.
    ListPool,

    /// Compare the pool with the store.
    Drift,

    /// Validate the configuration and, optionally, manifests.
    Validate {
        /// Manifest file to validate as well.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },
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

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from(["userpool", "--output", "json", "apply", "-f", "users.yaml"])
            .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Apply { file, reconcile } => {
                assert_eq!(file, PathBuf::from("users.yaml"));
                assert!(!reconcile);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_list_pool() {
        let cli = Cli::try_parse_from(["userpool", "list-pool", "-v"]).expect("parse");
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::ListPool));
    }
}
