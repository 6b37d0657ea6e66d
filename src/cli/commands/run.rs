//! Run command - Execute a playbook
//!
//! This module implements the `run` subcommand.

use super::CommandContext;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use provisor::connection::ConnectionFactory;
use provisor::executor::{new_run_timestamp, Executor, ExecutorConfig};
use provisor::playbook::Playbook;

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to the playbook file
    #[arg(required = true)]
    pub playbook: PathBuf,

    /// Directory reports are written to
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,

    /// Target directory exposed to tasks as `target_dir`
    #[arg(long)]
    pub target_dir: Option<PathBuf>,

    /// Per-command timeout in seconds
    #[arg(long)]
    pub command_timeout: Option<u64>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        if !self.playbook.exists() {
            ctx.output.error(&format!(
                "Playbook file not found: {}",
                self.playbook.display()
            ));
            return Ok(1);
        }

        ctx.output.banner(&format!(
            "PLAYBOOK: {}",
            self.playbook
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
        ));

        ctx.output.info("Loading playbook...");
        let playbook = Playbook::load(&self.playbook)
            .map_err(provisor::error::Error::from)
            .with_context(|| format!("Failed to load playbook: {}", self.playbook.display()))?;
        let inventory = ctx.load_inventory()?;

        let mut extra_vars = ctx.parse_extra_vars()?;
        if let Some(target_dir) = self
            .target_dir
            .as_ref()
            .or(ctx.config.reports.target_dir.as_ref())
        {
            extra_vars
                .entry("target_dir")
                .or_insert_with(|| serde_json::json!(target_dir.display().to_string()));
        }

        if ctx.check_mode {
            ctx.output
                .warning("Running in CHECK MODE - no changes will be made");
        }

        let config = ExecutorConfig {
            forks: ctx.forks,
            check_mode: ctx.check_mode,
            command_timeout: self.command_timeout.or(ctx.config.defaults.command_timeout),
            run_timeout: ctx.run_timeout(),
            retry: ctx.config.retry_config(),
            reports_dir: self
                .reports_dir
                .clone()
                .unwrap_or_else(|| ctx.config.reports.dir.clone()),
            run_timestamp: new_run_timestamp(),
            extra_vars,
            limit: ctx.limit.clone(),
            base_dir: playbook.base_dir(),
        };

        let provider = Arc::new(ConnectionFactory::new(ctx.config.ssh_settings()));
        let executor =
            Executor::new(config, provider).with_callback(Arc::new(ctx.output.clone()));

        let summary = executor.run(&playbook, &inventory).await?;
        ctx.output.summary(&summary);

        Ok(summary.exit_code())
    }
}
