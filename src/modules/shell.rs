//! Shell module - run a command through `sh -c`
//!
//! Accepts either a bare command string or a mapping:
//!
//! ```yaml
//! - name: build assets
//!   shell:
//!     cmd: make assets
//!     chdir: /srv/app
//!     creates: /srv/app/public/assets
//! ```
//!
//! When `creates` names a path that already exists the command is not run.
//! A non-zero exit code fails the task; output is kept in the result either
//! way.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{ActionResult, ModuleContext, ModuleOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ShellArgsRepr")]
pub struct ShellArgs {
    pub cmd: String,
    pub chdir: Option<String>,
    pub creates: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ShellArgsRepr {
    Line(String),
    Full {
        #[serde(alias = "command")]
        cmd: String,
        #[serde(default)]
        chdir: Option<String>,
        #[serde(default)]
        creates: Option<String>,
    },
}

impl From<ShellArgsRepr> for ShellArgs {
    fn from(repr: ShellArgsRepr) -> Self {
        match repr {
            ShellArgsRepr::Line(cmd) => ShellArgs {
                cmd,
                chdir: None,
                creates: None,
            },
            ShellArgsRepr::Full {
                cmd,
                chdir,
                creates,
            } => ShellArgs {
                cmd,
                chdir,
                creates,
            },
        }
    }
}

pub async fn execute(args: &ShellArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    if args.cmd.trim().is_empty() {
        return Err(super::ActionError::InvalidArgs(
            "shell requires a non-empty command".to_string(),
        ));
    }

    if let Some(creates) = &args.creates {
        if ctx.connection.path_exists(Path::new(creates)).await? {
            return Ok(ModuleOutput::satisfied(format!(
                "skipped, since {} exists",
                creates
            )));
        }
    }

    if ctx.check_mode {
        return Ok(ModuleOutput::would_change(format!(
            "would run: {}",
            args.cmd
        )));
    }

    let mut options = ctx.exec_options();
    if let Some(chdir) = &args.chdir {
        options = options.with_cwd(chdir.clone());
    }

    let result = ctx.connection.execute(&args.cmd, Some(options)).await?;

    let output = if result.success {
        ModuleOutput::changed("command completed")
    } else {
        ModuleOutput::failed(format!("non-zero return code {}", result.exit_code))
    };
    Ok(output.with_command(&result).with_data("cmd", serde_json::json!(args.cmd)))
}
