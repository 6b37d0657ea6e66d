//! Validate command - check a playbook without running it

use super::CommandContext;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use provisor::playbook::Playbook;

/// Arguments for validate command
#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    /// Playbook file to validate
    pub playbook: PathBuf,
}

impl ValidateArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        match Playbook::load(&self.playbook) {
            Ok(playbook) => {
                ctx.output.line(&format!(
                    "{}: OK ({} plays, {} tasks)",
                    self.playbook.display(),
                    playbook.plays.len(),
                    playbook.task_count()
                ));
                Ok(0)
            }
            Err(e) => {
                ctx.output
                    .error(&format!("{}: {}", self.playbook.display(), e));
                Ok(1)
            }
        }
    }
}
