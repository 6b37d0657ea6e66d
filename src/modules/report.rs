//! Report module - render a per-host report on the controller
//!
//! ```yaml
//! - name: write summary
//!   report:
//!     template: templates/summary.txt.j2
//!     kind: summary
//!     ext: txt
//! ```
//!
//! Always runs on the controller. An undefined placeholder fails this task
//! with a template error; nothing is written.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ActionError, ActionResult, ModuleContext, ModuleOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportArgs {
    #[serde(alias = "src")]
    pub template: String,
    pub kind: String,
    #[serde(default = "default_ext")]
    pub ext: String,
}

fn default_ext() -> String {
    "txt".to_string()
}

pub async fn execute(args: &ReportArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    let (resolved, raw) = ctx.read_local(&args.template).await?;
    let source = String::from_utf8(raw).map_err(|_| {
        ActionError::InvalidArgs(format!("template {} is not valid UTF-8", resolved.display()))
    })?;

    let path = ctx
        .reports
        .report_path(ctx.run_timestamp, &args.kind, ctx.host, &args.ext)?;

    if ctx.check_mode {
        // Still render so broken templates surface in a dry run
        ctx.reports
            .render(&args.template, &source, ctx.context)
            .map_err(crate::report::ReportError::from)?;
        return Ok(ModuleOutput::would_change(format!(
            "would write {}",
            path.display()
        ))
        .with_data("path", json!(path.display().to_string())));
    }

    let written = ctx.reports.write_report(
        ctx.run_timestamp,
        &args.kind,
        ctx.host,
        &args.ext,
        &args.template,
        &source,
        ctx.context,
    )?;

    Ok(ModuleOutput::changed(format!("wrote {}", written.display()))
        .with_data("path", json!(written.display().to_string())))
}
