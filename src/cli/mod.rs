//! CLI module for the userpool operator.
//!
//! This module provides the command-line interface for managing declared
//! users and running the controller.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::OutputFormatter;
