//! Template module - render a controller-side template onto the target
//!
//! The source is rendered strictly against the host's store snapshot, then
//! deployed like `copy`.

use serde::{Deserialize, Serialize};

use super::copy::deploy_content;
use super::{ActionError, ActionResult, ModeArg, ModuleContext, ModuleOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateArgs {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub mode: Option<ModeArg>,
}

pub async fn execute(args: &TemplateArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    let (resolved, raw) = ctx.read_local(&args.src).await?;
    let source = String::from_utf8(raw).map_err(|_| {
        ActionError::InvalidArgs(format!("template {} is not valid UTF-8", resolved.display()))
    })?;

    let rendered = ctx.templates.render(&args.src, &source, ctx.context)?;
    deploy_content(ctx, rendered.as_bytes(), &args.dest, args.mode.as_ref()).await
}
