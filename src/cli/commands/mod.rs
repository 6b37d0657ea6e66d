//! Subcommands module for provisor CLI
//!
//! This module contains all the subcommand implementations.

pub mod inventory;
pub mod run;
pub mod validate;

use crate::cli::output::OutputFormatter;
use crate::config::Config;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Inventory path from the command line
    pub inventory_path: Option<PathBuf>,
    /// Extra variables
    pub extra_vars: Vec<String>,
    /// Verbosity level
    pub verbosity: u8,
    /// Check mode (dry-run)
    pub check_mode: bool,
    /// Limit pattern
    pub limit: Option<String>,
    /// Number of parallel hosts
    pub forks: usize,
    /// Run timeout in seconds
    pub timeout: Option<u64>,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self {
            output,
            inventory_path: cli.inventory.clone(),
            extra_vars: cli.extra_vars.clone(),
            verbosity: cli.verbosity(),
            check_mode: cli.check_mode,
            limit: cli.limit.clone(),
            forks: cli.forks.unwrap_or(config.defaults.forks),
            timeout: cli.timeout.or(config.defaults.timeout),
            config,
        }
    }

    /// Get the effective inventory path
    pub fn inventory(&self) -> Option<&PathBuf> {
        self.inventory_path
            .as_ref()
            .or(self.config.defaults.inventory.as_ref())
    }

    /// Load the inventory named on the command line or in the config
    pub fn load_inventory(&self) -> Result<provisor::inventory::Inventory> {
        let path = self
            .inventory()
            .context("No inventory given; use --inventory or set defaults.inventory")?;
        provisor::inventory::Inventory::load(path)
            .map_err(provisor::error::Error::from)
            .with_context(|| format!("Failed to load inventory: {}", path.display()))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Parse extra variables into a JSON map
    pub fn parse_extra_vars(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut vars = serde_json::Map::new();

        for var in &self.extra_vars {
            if let Some(file_path) = var.strip_prefix('@') {
                // Load from file
                let content = std::fs::read_to_string(file_path)
                    .with_context(|| format!("Failed to read extra vars file: {}", file_path))?;
                let file_vars: indexmap::IndexMap<String, serde_yaml::Value> =
                    serde_yaml::from_str(&content)
                        .with_context(|| format!("Invalid extra vars file: {}", file_path))?;
                for (key, value) in file_vars {
                    vars.insert(key, provisor::inventory::yaml_to_json(&value));
                }
            } else if let Some((key, value)) = var.split_once('=') {
                // Parse key=value
                let parsed_value: serde_yaml::Value = serde_yaml::from_str(value)
                    .unwrap_or_else(|_| serde_yaml::Value::String(value.to_string()));
                vars.insert(
                    key.to_string(),
                    provisor::inventory::yaml_to_json(&parsed_value),
                );
            } else {
                anyhow::bail!("Invalid extra var '{}': expected key=value or @file", var);
            }
        }

        Ok(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_parse_extra_vars() {
        let cli = Cli::try_parse_from([
            "provisor", "-e", "port=8080", "-e", "name=web", "run", "site.yml",
        ])
        .unwrap();
        let ctx = CommandContext::new(&cli, Config::default());
        let vars = ctx.parse_extra_vars().unwrap();
        assert_eq!(vars["port"], serde_json::json!(8080));
        assert_eq!(vars["name"], serde_json::json!("web"));
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        config.defaults.forks = 9;
        config.defaults.timeout = Some(60);

        let cli = Cli::try_parse_from(["provisor", "-f", "2", "run", "site.yml"]).unwrap();
        let ctx = CommandContext::new(&cli, config.clone());
        assert_eq!(ctx.forks, 2);
        assert_eq!(ctx.run_timeout(), Some(Duration::from_secs(60)));

        let cli = Cli::try_parse_from(["provisor", "run", "site.yml"]).unwrap();
        let ctx = CommandContext::new(&cli, config);
        assert_eq!(ctx.forks, 9);
    }
}
