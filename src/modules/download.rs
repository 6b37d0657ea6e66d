//! Download module - fetch a URL to a path
//!
//! On the controller the artifact is fetched with `reqwest`; on a remote
//! host `curl` is run there. An existing destination is left alone when it
//! matches `checksum` (or, without a checksum, simply exists).
//!
//! ```yaml
//! - name: fetch release
//!   download:
//!     url: https://releases.example.com/app-1.4.2.tar.gz
//!     dest: /var/cache/provisor/app.tar.gz
//!     checksum: sha256:4f2c...
//!   delegate_to: localhost
//!   run_once: true
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{sha256_hex, ActionError, ActionResult, ModeArg, ModuleContext, ModuleOutput};
use crate::connection::{escape_shell_arg, TransferOptions};

const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadArgs {
    pub url: String,
    pub dest: String,
    /// Expected SHA-256, optionally prefixed with `sha256:`
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub mode: Option<ModeArg>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl DownloadArgs {
    fn expected_checksum(&self) -> ActionResult<Option<String>> {
        let Some(raw) = &self.checksum else {
            return Ok(None);
        };
        let digest = match raw.split_once(':') {
            Some(("sha256", digest)) => digest,
            Some((algo, _)) => {
                return Err(ActionError::InvalidArgs(format!(
                    "unsupported checksum algorithm '{}'",
                    algo
                )))
            }
            None => raw.as_str(),
        };
        let digest = digest.trim().to_lowercase();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ActionError::InvalidArgs(format!(
                "checksum '{}' is not a SHA-256 hex digest",
                raw
            )));
        }
        Ok(Some(digest))
    }
}

pub async fn execute(args: &DownloadArgs, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
    let url = url::Url::parse(&args.url)
        .map_err(|e| ActionError::InvalidArgs(format!("invalid url '{}': {}", args.url, e)))?;
    let expected = args.expected_checksum()?;
    let mode = args.mode.as_ref().map(ModeArg::bits).transpose()?;

    let current = ctx.remote_checksum(&args.dest).await?;
    if let Some(current) = &current {
        let satisfied = match &expected {
            Some(expected) => current == expected,
            None => true,
        };
        if satisfied {
            return Ok(ModuleOutput::satisfied(format!("{} already present", args.dest))
                .with_data("dest", json!(args.dest))
                .with_data("checksum", json!(current))
                .with_data("url", json!(args.url)));
        }
    }

    if ctx.check_mode {
        return Ok(ModuleOutput::would_change(format!(
            "would download {} to {}",
            args.url, args.dest
        ))
        .with_data("dest", json!(args.dest))
        .with_data("url", json!(args.url)));
    }

    let timeout = args.timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    let checksum = if ctx.on_controller {
        fetch_on_controller(ctx, &url, &args.dest, expected.as_deref(), mode, timeout).await?
    } else {
        fetch_on_remote(ctx, &url, &args.dest, expected.as_deref(), mode, timeout).await?
    };

    Ok(ModuleOutput::changed(format!("downloaded {} to {}", args.url, args.dest))
        .with_data("dest", json!(args.dest))
        .with_data("checksum", json!(checksum))
        .with_data("url", json!(args.url)))
}

async fn fetch_on_controller(
    ctx: &ModuleContext<'_>,
    url: &url::Url,
    dest: &str,
    expected: Option<&str>,
    mode: Option<u32>,
    timeout: u64,
) -> ActionResult<String> {
    debug!(url = %url, dest = %dest, "Downloading on controller");
    let download_error = |message: String| ActionError::Download {
        url: url.to_string(),
        message,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|e| download_error(e.to_string()))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| download_error(e.to_string()))?
        .error_for_status()
        .map_err(|e| download_error(e.to_string()))?;

    let body = response
        .bytes()
        .await
        .map_err(|e| download_error(e.to_string()))?;

    let actual = sha256_hex(&body);
    if let Some(expected) = expected {
        if actual != expected {
            return Err(ActionError::ChecksumMismatch {
                path: dest.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    let mut options = TransferOptions::new().with_create_dirs();
    if let Some(mode) = mode {
        options = options.with_mode(mode);
    }
    ctx.connection
        .upload_content(&body, Path::new(dest), Some(options))
        .await?;

    Ok(actual)
}

async fn fetch_on_remote(
    ctx: &ModuleContext<'_>,
    url: &url::Url,
    dest: &str,
    expected: Option<&str>,
    mode: Option<u32>,
    timeout: u64,
) -> ActionResult<String> {
    debug!(host = %ctx.host, url = %url, dest = %dest, "Downloading on remote host");
    let quoted_dest = escape_shell_arg(dest);
    let command = format!(
        "curl -fsSL --create-dirs --max-time {} -o {} {}",
        timeout,
        quoted_dest,
        escape_shell_arg(url.as_str())
    );
    let result = ctx.run(&command).await?;
    if !result.success {
        return Err(ActionError::Download {
            url: url.to_string(),
            message: format!("curl exited with {}: {}", result.exit_code, result.stderr.trim()),
        });
    }

    let actual = ctx
        .remote_checksum(dest)
        .await?
        .ok_or_else(|| ActionError::Download {
            url: url.to_string(),
            message: format!("{} missing after download", dest),
        })?;

    if let Some(expected) = expected {
        if actual != expected {
            let _ = ctx.run(&format!("rm -f {}", quoted_dest)).await;
            return Err(ActionError::ChecksumMismatch {
                path: dest.to_string(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    if let Some(mode) = mode {
        ctx.run_checked(&format!("chmod {:o} {}", mode, quoted_dest))
            .await?;
    }

    Ok(actual)
}
