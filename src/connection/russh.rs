//! SSH connection module using russh
//!
//! Pure Rust SSH transport: one session per host, one channel per command,
//! SFTP for file transfer and metadata.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::config::{default_identity_files, expand_path, SshSettings};
use super::{
    escape_shell_arg, CommandResult, Connection, ConnectionError, ConnectionResult,
    ExecuteOptions, FileStat, RusshError, TransferOptions,
};
use crate::inventory::Host;

/// Client handler checking server keys against ~/.ssh/known_hosts
struct ClientHandler {
    host: String,
    port: u16,
    accept_unknown: bool,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = RusshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                debug!(host = %self.host, "Host key verified against known_hosts");
                Ok(true)
            }
            Ok(false) if self.accept_unknown => {
                warn!(host = %self.host, "Host not found in known_hosts, accepting");
                Ok(true)
            }
            Ok(false) => {
                warn!(host = %self.host, "Host not found in known_hosts, rejecting");
                Ok(false)
            }
            Err(e) => {
                warn!(
                    host = %self.host,
                    error = %e,
                    "HOST KEY VERIFICATION FAILED! Server key does not match known_hosts entry."
                );
                Ok(false)
            }
        }
    }
}

/// SSH connection to one inventory host
pub struct RusshConnection {
    identifier: String,
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    connected: Arc<AtomicBool>,
}

impl RusshConnection {
    /// Connect and authenticate to `host`
    pub async fn connect(host: &Host, settings: &SshSettings) -> ConnectionResult<Self> {
        let address = host.address().to_string();
        let port = host.port.unwrap_or(settings.port);
        let user = settings.effective_user(host.user.as_deref());
        let identifier = format!("{}@{}:{}", user, address, port);
        let timeout = settings.timeout_duration();

        debug!(host = %host.name, identifier = %identifier, "Opening SSH connection");

        let mut session = Self::do_connect(&address, port, timeout, settings).await?;
        tokio::time::timeout(
            timeout,
            Self::authenticate(&mut session, &user, host, settings),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))??;

        debug!(identifier = %identifier, "SSH connection established");

        Ok(Self {
            identifier,
            handle: Arc::new(RwLock::new(Some(session))),
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn do_connect(
        address: &str,
        port: u16,
        timeout: Duration,
        settings: &SshSettings,
    ) -> ConnectionResult<Handle<ClientHandler>> {
        let mut config = russh::client::Config::default();
        config.inactivity_timeout = Some(Duration::from_secs(settings.connect_timeout.max(60)));
        let config = Arc::new(config);

        let addr = format!("{}:{}", address, port);
        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let handler = ClientHandler {
            host: address.to_string(),
            port,
            accept_unknown: settings.accept_unknown_hosts,
        };

        tokio::time::timeout(
            timeout,
            russh::client::connect_stream(config, socket, handler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
        .map_err(|e| match e.0 {
            russh::Error::UnknownKey => ConnectionError::HostKeyRejected(addr.clone()),
            other => ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", other)),
        })
    }

    /// Key file from inventory, then configured identities, then ~/.ssh defaults, then password
    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        user: &str,
        host: &Host,
        settings: &SshSettings,
    ) -> ConnectionResult<()> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(key_file) = &host.key_file {
            candidates.push(expand_path(key_file));
        }
        candidates.extend(settings.identity_files.iter().map(|p| expand_path(p)));
        candidates.extend(default_identity_files());

        for key_path in &candidates {
            match Self::try_key_auth(session, user, key_path).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    debug!(key = %key_path.display(), "Key rejected by server");
                }
                Err(e) => {
                    debug!(key = %key_path.display(), error = %e, "Key authentication error");
                }
            }
        }

        if let Some(password) = &host.password {
            let authenticated = session
                .authenticate_password(user, password)
                .await
                .map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "Password authentication failed: {}",
                        e
                    ))
                })?;
            if authenticated {
                return Ok(());
            }
        }

        Err(ConnectionError::AuthenticationFailed(format!(
            "All authentication methods failed for {}@{}",
            user,
            host.address()
        )))
    }

    async fn try_key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
    ) -> ConnectionResult<bool> {
        let key_pair = load_secret_key(key_path, None).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!(
                "Failed to load key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "Key authentication failed for {}: {}",
                    key_path.display(),
                    e
                ))
            })
    }

    fn build_command(command: &str, options: &ExecuteOptions) -> String {
        let mut parts = Vec::new();

        if let Some(cwd) = &options.cwd {
            parts.push(format!("cd {} &&", escape_shell_arg(cwd)));
        }

        let mut env: Vec<_> = options.env.iter().collect();
        env.sort();
        for (key, value) in env {
            parts.push(format!("export {}={};", key, escape_shell_arg(value)));
        }

        if options.escalate {
            let user = options.escalate_user.as_deref().unwrap_or("root");
            parts.push(format!(
                "sudo -n -u {} -- sh -c {}",
                escape_shell_arg(user),
                escape_shell_arg(command)
            ));
        } else {
            parts.push(command.to_string());
        }

        parts.join(" ")
    }

    async fn open_sftp(&self) -> ConnectionResult<SftpSession> {
        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;

        let channel = handle.channel_open_session().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to open SFTP channel: {}", e))
        })?;
        drop(handle_guard);

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!("Failed to request SFTP: {}", e))
            })?;

        SftpSession::new(channel.into_stream()).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to start SFTP session: {}", e))
        })
    }

    async fn create_remote_dirs(sftp: &SftpSession, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            let current_str = current.to_string_lossy().to_string();
            if current_str == "/" {
                continue;
            }
            if !sftp.try_exists(&current_str).await.unwrap_or(false) {
                let _ = sftp.create_dir(current_str).await;
            }
        }
    }

    async fn run(&self, full_command: String) -> ConnectionResult<CommandResult> {
        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to open channel: {}", e))
        })?;
        drop(handle_guard);

        channel.exec(true, full_command).await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to execute command: {}", e))
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                // ext 1 is stderr
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let exit_code: i32 = exit_code.map(|e| e as i32).unwrap_or(i32::MAX);
        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        trace!(exit_code = %exit_code, "Command completed");

        if exit_code == 0 {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }
}

#[async_trait]
impl Connection for RusshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.handle.read().await.is_some()
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        let full_command = Self::build_command(command, &options);
        debug!(identifier = %self.identifier, command = %command, "Executing remote command");

        match options.timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.run(full_command))
                .await
                .map_err(|_| ConnectionError::Timeout(secs))?,
            None => self.run(full_command).await,
        }
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(dst = %remote_path.display(), size = %content.len(), "Uploading content via SFTP");

        let sftp = self.open_sftp().await?;
        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                Self::create_remote_dirs(&sftp, parent).await;
            }
        }

        let remote_path_str = remote_path.to_string_lossy().to_string();
        let mut remote_file = sftp.create(&remote_path_str).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to create remote file {}: {}",
                remote_path.display(),
                e
            ))
        })?;
        remote_file.write_all(content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to write to remote file: {}", e))
        })?;
        remote_file.shutdown().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to close remote file: {}", e))
        })?;
        drop(remote_file);

        if let Some(mode) = options.mode {
            let mut attrs = russh_sftp::protocol::FileAttributes::default();
            attrs.permissions = Some(mode);
            sftp.set_metadata(&remote_path_str, attrs)
                .await
                .map_err(|e| {
                    ConnectionError::TransferFailed(format!(
                        "Failed to set file permissions: {}",
                        e
                    ))
                })?;
        }

        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        let sftp = self.open_sftp().await?;
        let remote_path_str = remote_path.to_string_lossy().to_string();
        let mut remote_file = sftp.open(&remote_path_str).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to open remote file {}: {}",
                remote_path.display(),
                e
            ))
        })?;

        let mut content = Vec::new();
        remote_file.read_to_end(&mut content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to read remote file: {}", e))
        })?;
        Ok(content)
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        let sftp = self.open_sftp().await?;
        match sftp.try_exists(path.to_string_lossy().to_string()).await {
            Ok(exists) => Ok(exists),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Error checking path existence");
                Ok(false)
            }
        }
    }

    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool> {
        let sftp = self.open_sftp().await?;
        match sftp.metadata(path.to_string_lossy().to_string()).await {
            Ok(attrs) => Ok(attrs.is_dir()),
            Err(_) => Ok(false),
        }
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat> {
        let sftp = self.open_sftp().await?;
        let path_str = path.to_string_lossy().to_string();

        let is_symlink = match sftp.symlink_metadata(&path_str).await {
            Ok(attrs) => attrs.is_symlink(),
            Err(_) => false,
        };

        let attrs = sftp.metadata(&path_str).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to stat {}: {}", path.display(), e))
        })?;

        Ok(FileStat {
            size: attrs.size.unwrap_or(0),
            mode: attrs.permissions.unwrap_or(0),
            uid: attrs.uid.unwrap_or(0),
            gid: attrs.gid.unwrap_or(0),
            atime: attrs.atime.map(|t| t as i64).unwrap_or(0),
            mtime: attrs.mtime.map(|t| t as i64).unwrap_or(0),
            is_dir: attrs.is_dir(),
            is_file: attrs.is_regular(),
            is_symlink,
        })
    }

    async fn close(&self) -> ConnectionResult<()> {
        debug!(identifier = %self.identifier, "Closing SSH connection");
        self.connected.store(false, Ordering::SeqCst);

        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            let _ = handle
                .disconnect(
                    russh::Disconnect::ByApplication,
                    "Connection closed by client",
                    "en",
                )
                .await;
        }

        Ok(())
    }
}
