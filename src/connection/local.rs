//! Local connection module
//!
//! Runs commands through `sh -c` on the machine running provisor. Used for
//! hosts declared with `connection: local` and as the controller channel.

use async_trait::async_trait;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions, FileStat,
    TransferOptions,
};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl LocalConnection {
    /// Create a local connection named after the machine's hostname
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = if options.escalate {
            let user = options.escalate_user.as_deref().unwrap_or("root");
            let mut c = Command::new("sudo");
            c.arg("-n")
                .arg("-u")
                .arg(user)
                .arg("--")
                .arg("sh")
                .arg("-c")
                .arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    fn transfer_error(action: &str, path: &Path, e: std::io::Error) -> ConnectionError {
        ConnectionError::TransferFailed(format!("Failed to {} {}: {}", action, path.display(), e))
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, "Executing local command");

        let child = self.build_command(command, &options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        let output = match options.timeout {
            Some(secs) => {
                match tokio::time::timeout(
                    std::time::Duration::from_secs(secs),
                    child.wait_with_output(),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => return Err(ConnectionError::Timeout(secs)),
                }
            }
            None => child.wait_with_output().await,
        }
        .map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(dst = %remote_path.display(), size = %content.len(), "Writing content locally");

        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Self::transfer_error("create directory", parent, e))?;
            }
        }

        tokio::fs::write(remote_path, content)
            .await
            .map_err(|e| Self::transfer_error("write", remote_path, e))?;

        if let Some(mode) = options.mode {
            tokio::fs::set_permissions(remote_path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| Self::transfer_error("set permissions on", remote_path, e))?;
        }

        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        debug!(src = %remote_path.display(), "Reading file content locally");

        tokio::fs::read(remote_path)
            .await
            .map_err(|e| Self::transfer_error("read", remote_path, e))
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(tokio::fs::symlink_metadata(path).await.is_ok())
    }

    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Self::transfer_error("stat", path, e))?;
        let is_symlink = tokio::fs::symlink_metadata(path)
            .await
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        Ok(FileStat {
            size: metadata.len(),
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
            atime: metadata.atime(),
            mtime: metadata.mtime(),
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
            is_symlink,
        })
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}
