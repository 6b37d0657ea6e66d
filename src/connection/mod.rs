//! Connection layer for remote host communication.
//!
//! Every target host gets one [`Connection`] for the lifetime of its task
//! sequence. Connections are handed out by a [`ConnectionProvider`]; the
//! default provider is [`ConnectionFactory`], which opens an SSH session
//! (via `russh`) or a local channel depending on the inventory entry.
//!
//! # Example
//!
//! ```rust,ignore
//! use provisor::connection::{ConnectionFactory, ConnectionProvider, ExecuteOptions};
//!
//! let factory = ConnectionFactory::default();
//! let conn = factory.open(&host).await?;
//! let result = conn.execute("uname -r", None).await?;
//! println!("kernel: {}", result.stdout.trim());
//! conn.close().await?;
//! ```

/// Connection settings, retry policy and path helpers.
pub mod config;

/// Local execution connection implementation.
pub mod local;

/// Pure Rust SSH implementation using russh.
#[cfg(feature = "russh")]
pub mod russh;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::inventory::Host;

pub use config::{default_identity_files, expand_path, RetryConfig, SshSettings};
pub use local::LocalConnection;
#[cfg(feature = "russh")]
pub use self::russh::RusshConnection;

/// Russh-related error type - wraps russh::Error for the client Handler trait
#[cfg(feature = "russh")]
#[derive(Debug)]
pub struct RusshError(pub ::russh::Error);

#[cfg(feature = "russh")]
impl From<::russh::Error> for RusshError {
    fn from(err: ::russh::Error) -> Self {
        RusshError(err)
    }
}

#[cfg(feature = "russh")]
impl std::fmt::Display for RusshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Russh error: {}", self.0)
    }
}

#[cfg(feature = "russh")]
impl std::error::Error for RusshError {}

#[cfg(feature = "russh")]
impl From<::russh::Error> for ConnectionError {
    fn from(err: ::russh::Error) -> Self {
        ConnectionError::SshError(err.to_string())
    }
}

#[cfg(feature = "russh")]
impl From<russh_sftp::client::error::Error> for ConnectionError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        ConnectionError::TransferFailed(format!("SFTP error: {}", e))
    }
}

/// Errors that can occur while opening or using a connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the connection (network level).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote host.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server's host key was rejected.
    #[error("Host key verification failed for {0}")]
    HostKeyRejected(String),

    /// Command execution failed (not to be confused with non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download operation failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Connection or operation timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SSH-specific error from the underlying implementation.
    #[error("SSH error: {0}")]
    SshError(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ConnectionError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Authentication, host key and configuration failures are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionError::ConnectionFailed(_)
                | ConnectionError::Timeout(_)
                | ConnectionError::IoError(_)
                | ConnectionError::ConnectionClosed
                | ConnectionError::SshError(_)
        )
    }
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// ```rust
/// use provisor::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Timeout in seconds (None for no timeout)
    pub timeout: Option<u64>,
    /// Run command with privilege escalation
    pub escalate: bool,
    /// User to escalate to (default: root)
    pub escalate_user: Option<String>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable privilege escalation via sudo
    pub fn with_escalation(mut self, user: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_user = user;
        self
    }
}

/// Options for file transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// File mode (permissions) to set
    pub mode: Option<u32>,
    /// Create parent directories if missing
    pub create_dirs: bool,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_create_dirs(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

/// File metadata as reported by a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
}

/// A remote (or local) execution channel.
///
/// Implementations must be safe to share between the tasks of a single
/// host; the executor never drives two commands on one host concurrently,
/// but controller-delegated tasks from several hosts share the controller
/// connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Human readable identifier (`user@host:port` for SSH)
    fn identifier(&self) -> &str;

    /// Whether the underlying transport is still usable
    async fn is_alive(&self) -> bool;

    /// Run a shell command and capture its output
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Write `content` to `remote_path`
    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Read the full content of `remote_path`
    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>>;

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool>;

    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool>;

    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat>;

    /// Release the channel
    async fn close(&self) -> ConnectionResult<()>;
}

/// Hands out execution channels for inventory hosts.
///
/// `open` is called once per host per play; the caller owns the returned
/// channel and must `close` it once the host's task sequence is done.
/// `controller` returns the single shared channel to the machine running
/// provisor, used for controller-delegated tasks.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn open(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>>;

    fn controller(&self) -> Arc<dyn Connection>;
}

/// Default provider: local channel for local hosts, SSH for everything else.
pub struct ConnectionFactory {
    settings: SshSettings,
    controller: Arc<LocalConnection>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new(SshSettings::default())
    }
}

impl ConnectionFactory {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            controller: Arc::new(LocalConnection::with_identifier("controller")),
        }
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }
}

#[async_trait]
impl ConnectionProvider for ConnectionFactory {
    async fn open(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        if host.is_local() {
            debug!(host = %host.name, "Using local connection");
            return Ok(Arc::new(LocalConnection::with_identifier(host.name.clone())));
        }

        #[cfg(feature = "russh")]
        {
            let conn = RusshConnection::connect(host, &self.settings).await?;
            Ok(Arc::new(conn))
        }

        #[cfg(not(feature = "russh"))]
        {
            Err(ConnectionError::InvalidConfig(format!(
                "host '{}' needs SSH but provisor was built without the russh feature",
                host.name
            )))
        }
    }

    fn controller(&self) -> Arc<dyn Connection> {
        self.controller.clone()
    }
}

/// Open a channel, retrying transient failures with backoff.
///
/// Permanent failures (authentication, host key, configuration) are
/// returned immediately. With `max_retries == 0` this is a single attempt.
pub async fn open_with_retry(
    provider: &dyn ConnectionProvider,
    host: &Host,
    retry: &RetryConfig,
) -> ConnectionResult<Arc<dyn Connection>> {
    let mut attempt = 0;
    loop {
        match provider.open(host).await {
            Ok(conn) => return Ok(conn),
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    host = %host.name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Quote a string for safe interpolation into a POSIX shell command.
pub fn escape_shell_arg(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
