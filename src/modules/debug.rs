//! Debug module - print a message

use serde::{Deserialize, Serialize};

use super::{ActionResult, ModuleContext, ModuleOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DebugArgsRepr")]
pub struct DebugArgs {
    pub msg: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DebugArgsRepr {
    Line(String),
    Full { msg: String },
}

impl From<DebugArgsRepr> for DebugArgs {
    fn from(repr: DebugArgsRepr) -> Self {
        match repr {
            DebugArgsRepr::Line(msg) | DebugArgsRepr::Full { msg } => DebugArgs { msg },
        }
    }
}

pub async fn execute(args: &DebugArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    tracing::info!(host = %ctx.host, "{}", args.msg);
    Ok(ModuleOutput::ok(args.msg.clone()))
}
