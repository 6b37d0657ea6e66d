//! Stat module - read file metadata
//!
//! Never changes anything. The result carries a `stat` object:
//! `exists`, and when the path exists `size`, `mode`, `is_dir`, `is_file`,
//! `is_link`, `mtime` and (for regular files) `checksum`.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use super::{ActionResult, ModuleContext, ModuleOutput};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatArgs {
    pub path: String,
    #[serde(default = "default_true")]
    pub checksum: bool,
}

fn default_true() -> bool {
    true
}

pub async fn execute(args: &StatArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    let path = Path::new(&args.path);

    if !ctx.connection.path_exists(path).await? {
        return Ok(ModuleOutput::ok(format!("{} does not exist", args.path))
            .with_data("stat", json!({ "exists": false, "path": args.path })));
    }

    let stat = ctx.connection.stat(path).await?;
    let checksum = if args.checksum && stat.is_file {
        ctx.remote_checksum(&args.path).await?
    } else {
        None
    };

    Ok(ModuleOutput::ok(format!("{} exists", args.path)).with_data(
        "stat",
        json!({
            "exists": true,
            "path": args.path,
            "size": stat.size,
            "mode": format!("{:04o}", stat.mode & 0o7777),
            "uid": stat.uid,
            "gid": stat.gid,
            "is_dir": stat.is_dir,
            "is_file": stat.is_file,
            "is_link": stat.is_symlink,
            "mtime": stat.mtime,
            "checksum": checksum,
        }),
    ))
}
