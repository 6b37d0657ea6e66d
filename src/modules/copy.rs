//! Copy module - push a controller file to the target
//!
//! The source is read on the controller (relative paths resolve against the
//! playbook directory). The destination is only written when its SHA-256
//! differs from the source, or when it does not exist.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use super::{sha256_hex, ActionResult, ModeArg, ModuleContext, ModuleOutput};
use crate::connection::TransferOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyArgs {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub mode: Option<ModeArg>,
}

pub async fn execute(args: &CopyArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    let (_, content) = ctx.read_local(&args.src).await?;
    deploy_content(ctx, &content, &args.dest, args.mode.as_ref()).await
}

/// Write `content` to `dest` unless it is already there byte-for-byte
pub(crate) async fn deploy_content(
    ctx: &ModuleContext<'_>,
    content: &[u8],
    dest: &str,
    mode: Option<&ModeArg>,
) -> ActionResult<ModuleOutput> {
    let mode = mode.map(ModeArg::bits).transpose()?;
    let checksum = sha256_hex(content);
    let current = ctx.remote_checksum(dest).await?;

    let data = |output: ModuleOutput| {
        output
            .with_data("dest", json!(dest))
            .with_data("checksum", json!(checksum))
            .with_data("size", json!(content.len()))
    };

    if current.as_deref() == Some(checksum.as_str()) {
        return Ok(data(ModuleOutput::satisfied(format!(
            "{} already up to date",
            dest
        ))));
    }

    if ctx.check_mode {
        let verb = if current.is_some() { "update" } else { "create" };
        return Ok(data(ModuleOutput::would_change(format!(
            "would {} {}",
            verb, dest
        ))));
    }

    let mut options = TransferOptions::new().with_create_dirs();
    if let Some(mode) = mode {
        options = options.with_mode(mode);
    }
    ctx.connection
        .upload_content(content, Path::new(dest), Some(options))
        .await?;

    Ok(data(ModuleOutput::changed(format!("{} written", dest))))
}
