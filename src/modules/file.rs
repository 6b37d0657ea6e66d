//! File module - directories, empty files and removal

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use super::{ActionError, ActionResult, ModeArg, ModuleContext, ModuleOutput};
use crate::connection::escape_shell_arg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Path must exist (as anything); only the mode is managed
    #[default]
    File,
    Directory,
    Touch,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArgs {
    #[serde(alias = "dest", alias = "name")]
    pub path: String,
    #[serde(default)]
    pub state: FileState,
    #[serde(default)]
    pub mode: Option<ModeArg>,
}

pub async fn execute(args: &FileArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    let path = Path::new(&args.path);
    let quoted = escape_shell_arg(&args.path);
    let mode = args.mode.as_ref().map(ModeArg::bits).transpose()?;
    let exists = ctx.connection.path_exists(path).await?;

    let mut commands: Vec<String> = Vec::new();
    match args.state {
        FileState::Absent => {
            if exists {
                commands.push(format!("rm -rf {}", quoted));
            }
        }
        FileState::Directory => {
            if exists && !ctx.connection.is_directory(path).await? {
                return Err(ActionError::InvalidArgs(format!(
                    "{} exists and is not a directory",
                    args.path
                )));
            }
            if !exists {
                commands.push(format!("mkdir -p {}", quoted));
            }
        }
        FileState::Touch => {
            if !exists {
                commands.push(format!("touch {}", quoted));
            }
        }
        FileState::File => {
            if !exists {
                return Ok(ModuleOutput::failed(format!("{} does not exist", args.path))
                    .with_data("path", json!(args.path)));
            }
        }
    }

    if let (Some(mode), true) = (mode, args.state != FileState::Absent) {
        let current = if exists {
            Some(ctx.connection.stat(path).await?.mode & 0o7777)
        } else {
            None
        };
        if current != Some(mode) {
            commands.push(format!("chmod {:o} {}", mode, quoted));
        }
    }

    let state = format!("{:?}", args.state).to_lowercase();
    if commands.is_empty() {
        return Ok(ModuleOutput::satisfied(format!("{} already {}", args.path, state))
            .with_data("path", json!(args.path))
            .with_data("state", json!(state)));
    }

    if ctx.check_mode {
        return Ok(ModuleOutput::would_change(format!("would run: {}", commands.join(" && ")))
            .with_data("path", json!(args.path))
            .with_data("state", json!(state)));
    }

    let command = commands.join(" && ");
    let result = ctx.run_checked(&command).await?;

    Ok(ModuleOutput::changed(format!("{} is now {}", args.path, state))
        .with_command(&result)
        .with_data("path", json!(args.path))
        .with_data("state", json!(state)))
}
