//! CLI module for provisor
//!
//! This module provides the command-line interface for provisor,
//! including argument parsing and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// provisor - a minimal idempotent remote-task runner
#[derive(Parser, Debug, Clone)]
#[command(name = "provisor")]
#[command(version)]
#[command(about = "Run idempotent task lists against inventory hosts over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to inventory file
    #[arg(short = 'i', long, global = true, env = "PROVISOR_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Extra variables (key=value or @file.yml)
    #[arg(short = 'e', long = "extra-vars", global = true, action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Run in check mode (dry-run, don't make changes)
    #[arg(long = "check", global = true)]
    pub check_mode: bool,

    /// Limit execution to hosts matching a pattern
    #[arg(short = 'l', long, global = true)]
    pub limit: Option<String>,

    /// Number of hosts to run in parallel
    #[arg(short = 'f', long, global = true)]
    pub forks: Option<usize>,

    /// Run timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a playbook
    Run(commands::run::RunArgs),

    /// List hosts in inventory
    #[command(name = "list-hosts")]
    ListHosts(commands::inventory::ListHostsArgs),

    /// Validate playbook syntax and task ordering
    Validate(commands::validate::ValidateArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}
