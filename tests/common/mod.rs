//! Shared test utilities for the provisor test suite.
//!
//! This module provides:
//! - A scriptable [`MockConnection`] with a virtual filesystem
//! - A [`MockProvider`] handing out one mock per inventory host
//! - Inventory and executor config fixtures
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tempfile::TempDir;

use provisor::connection::{
    CommandResult, Connection, ConnectionError, ConnectionProvider, ConnectionResult,
    ExecuteOptions, FileStat, LocalConnection, RetryConfig, TransferOptions,
};
use provisor::executor::ExecutorConfig;
use provisor::inventory::{Host, Inventory};
use provisor::modules::sha256_hex;

// ============================================================================
// Command Result Helpers
// ============================================================================

/// Exit code 0 with the given stdout
pub fn ok(stdout: &str) -> CommandResult {
    CommandResult::success(stdout.to_string(), String::new())
}

/// Non-zero exit with the given stderr
pub fn fail(exit_code: i32, stderr: &str) -> CommandResult {
    CommandResult::failure(exit_code, String::new(), stderr.to_string())
}

/// `/etc/os-release` content for an Ubuntu host
pub const UBUNTU_OS_RELEASE: &str = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n";

// ============================================================================
// Concurrency Gauge
// ============================================================================

/// Tracks how many commands are in flight at once across the mocks
/// sharing it.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Highest number of simultaneous commands observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Connection Implementation
// ============================================================================

/// A mock connection for testing purposes.
///
/// Commands are answered by the most recently registered pattern they
/// contain, falling back to the default result. `sha256sum` invocations
/// are answered from the virtual filesystem so checksum comparisons behave
/// like a real host.
///
/// ```rust,ignore
/// let mock = MockConnection::new("web1");
/// mock.respond("dpkg-query", ok(""));
/// mock.respond("systemctl is-active", fail(3, "inactive"));
/// ```
#[derive(Debug)]
pub struct MockConnection {
    identifier: String,
    alive: AtomicBool,
    commands_executed: RwLock<Vec<String>>,
    escalated: RwLock<Vec<String>>,
    uploads: RwLock<Vec<PathBuf>>,
    responses: RwLock<Vec<(String, CommandResult)>>,
    default_result: RwLock<CommandResult>,
    should_fail: AtomicBool,
    close_count: AtomicU32,
    virtual_filesystem: RwLock<HashMap<PathBuf, Vec<u8>>>,
    directories: RwLock<HashSet<PathBuf>>,
    latency: RwLock<Option<(Duration, Arc<ConcurrencyGauge>)>>,
}

impl MockConnection {
    /// Create a new mock connection with the given identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            alive: AtomicBool::new(true),
            commands_executed: RwLock::new(Vec::new()),
            escalated: RwLock::new(Vec::new()),
            uploads: RwLock::new(Vec::new()),
            responses: RwLock::new(Vec::new()),
            default_result: RwLock::new(ok("")),
            should_fail: AtomicBool::new(false),
            close_count: AtomicU32::new(0),
            virtual_filesystem: RwLock::new(HashMap::new()),
            directories: RwLock::new(HashSet::new()),
            latency: RwLock::new(None),
        }
    }

    /// Answer every command containing `pattern` with `result`.
    pub fn respond(&self, pattern: impl Into<String>, result: CommandResult) -> &Self {
        self.responses.write().push((pattern.into(), result));
        self
    }

    /// Set the default result for commands not explicitly configured.
    pub fn set_default_result(&self, result: CommandResult) {
        *self.default_result.write() = result;
    }

    /// Make every command take `delay`, counted on `gauge` while running.
    pub fn set_latency(&self, delay: Duration, gauge: Arc<ConcurrencyGauge>) {
        *self.latency.write() = Some((delay, gauge));
    }

    /// Configure the mock to fail all operations at the transport level.
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Make the fact probes report an Ubuntu host.
    pub fn as_ubuntu(&self) -> &Self {
        self.respond("cat /etc/os-release", ok(UBUNTU_OS_RELEASE))
    }

    /// Get all commands that were executed.
    pub fn get_commands(&self) -> Vec<String> {
        self.commands_executed.read().clone()
    }

    /// Commands that ran with privilege escalation.
    pub fn get_escalated_commands(&self) -> Vec<String> {
        self.escalated.read().clone()
    }

    /// Number of executed commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands_executed
            .read()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count_matching(pattern) > 0
    }

    /// Destinations written through `upload_content`.
    pub fn get_uploads(&self) -> Vec<PathBuf> {
        self.uploads.read().clone()
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Add a virtual file to the mock filesystem.
    pub fn add_virtual_file(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.virtual_filesystem
            .write()
            .insert(path.into(), content.into());
    }

    pub fn add_virtual_dir(&self, path: impl Into<PathBuf>) {
        self.directories.write().insert(path.into());
    }

    /// Content of a virtual file, if present.
    pub fn virtual_file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.virtual_filesystem.read().get(path.as_ref()).cloned()
    }

    fn scripted(&self, command: &str) -> Option<CommandResult> {
        self.responses
            .read()
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
    }

    /// `sha256sum '<path>' ...` answered from the virtual filesystem
    fn checksum(&self, command: &str) -> Option<CommandResult> {
        let rest = command.strip_prefix("sha256sum '")?;
        let path = &rest[..rest.find('\'')?];
        Some(match self.virtual_filesystem.read().get(Path::new(path)) {
            Some(content) => ok(&format!("{}  {}\n", sha256_hex(content), path)),
            None => fail(1, "No such file or directory"),
        })
    }

    fn check_should_fail(&self) -> ConnectionResult<()> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.check_should_fail()?;

        self.commands_executed.write().push(command.to_string());
        if options.map_or(false, |o| o.escalate) {
            self.escalated.write().push(command.to_string());
        }

        let latency = self.latency.read().clone();
        if let Some((delay, gauge)) = latency {
            gauge.enter();
            tokio::time::sleep(delay).await;
            gauge.exit();
        }

        if let Some(result) = self.scripted(command) {
            return Ok(result);
        }
        if let Some(result) = self.checksum(command) {
            return Ok(result);
        }

        Ok(self.default_result.read().clone())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.check_should_fail()?;

        self.uploads.write().push(remote_path.to_path_buf());
        self.virtual_filesystem
            .write()
            .insert(remote_path.to_path_buf(), content.to_vec());
        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        self.check_should_fail()?;

        self.virtual_file(remote_path).ok_or_else(|| {
            ConnectionError::TransferFailed(format!(
                "File not found in virtual filesystem: {:?}",
                remote_path
            ))
        })
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        self.check_should_fail()?;
        Ok(self.virtual_filesystem.read().contains_key(path)
            || self.directories.read().contains(path))
    }

    async fn is_directory(&self, path: &Path) -> ConnectionResult<bool> {
        self.check_should_fail()?;
        Ok(self.directories.read().contains(path))
    }

    async fn stat(&self, path: &Path) -> ConnectionResult<FileStat> {
        self.check_should_fail()?;

        if self.directories.read().contains(path) {
            return Ok(FileStat {
                mode: 0o755,
                is_dir: true,
                ..Default::default()
            });
        }

        match self.virtual_filesystem.read().get(path) {
            Some(content) => Ok(FileStat {
                size: content.len() as u64,
                mode: 0o644,
                is_file: true,
                ..Default::default()
            }),
            None => Err(ConnectionError::ExecutionFailed(format!(
                "stat: cannot stat '{}'",
                path.display()
            ))),
        }
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Mock Provider
// ============================================================================

/// Hands out one [`MockConnection`] per inventory host plus a controller mock.
///
/// Hosts marked unreachable fail to open with a transient error. With
/// [`MockProvider::with_local_controller`] delegated tasks run on the real
/// machine instead, so controller-side files actually land on disk.
pub struct MockProvider {
    hosts: RwLock<HashMap<String, Arc<MockConnection>>>,
    controller: Arc<MockConnection>,
    local_controller: Option<Arc<LocalConnection>>,
    unreachable: RwLock<HashSet<String>>,
    opens: AtomicU32,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            hosts: RwLock::new(HashMap::new()),
            controller: Arc::new(MockConnection::new("controller")),
            local_controller: None,
            unreachable: RwLock::new(HashSet::new()),
            opens: AtomicU32::new(0),
        }
    }

    pub fn with_local_controller() -> Self {
        Self {
            local_controller: Some(Arc::new(LocalConnection::with_identifier("controller"))),
            ..Self::new()
        }
    }

    /// The mock for `name`, created on first use.
    pub fn host(&self, name: &str) -> Arc<MockConnection> {
        self.hosts
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MockConnection::new(name)))
            .clone()
    }

    pub fn controller_mock(&self) -> Arc<MockConnection> {
        self.controller.clone()
    }

    pub fn set_unreachable(&self, name: &str) {
        self.unreachable.write().insert(name.to_string());
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Commands across every host mock, controller excluded.
    pub fn all_host_commands(&self) -> Vec<String> {
        self.hosts
            .read()
            .values()
            .flat_map(|m| m.get_commands())
            .collect()
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn open(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.read().contains(&host.name) {
            return Err(ConnectionError::ConnectionFailed(format!(
                "{}: connection refused",
                host.address()
            )));
        }
        let conn: Arc<dyn Connection> = self.host(&host.name);
        Ok(conn)
    }

    fn controller(&self) -> Arc<dyn Connection> {
        match &self.local_controller {
            Some(local) => local.clone(),
            None => self.controller.clone(),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Inventory with every given host in the `webservers` group
pub fn web_inventory(hosts: &[&str]) -> Inventory {
    let mut yaml = String::from("all:\n  children:\n    webservers:\n      hosts:\n");
    for (i, host) in hosts.iter().enumerate() {
        yaml.push_str(&format!("        {}: {{ address: 10.0.0.{} }}\n", host, 11 + i));
    }
    Inventory::from_yaml_str(&yaml).expect("fixture inventory parses")
}

/// Executor config writing reports into `dir`, with no connection retries
pub fn test_config(dir: &TempDir) -> ExecutorConfig {
    ExecutorConfig {
        forks: 5,
        retry: RetryConfig {
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
            exponential_backoff: false,
            max_delay: Duration::from_millis(1),
        },
        reports_dir: dir.path().join("reports"),
        run_timestamp: "20240101T000000Z".to_string(),
        base_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}

/// Write `content` to `name` inside `dir`, returning the path
pub fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture dir");
    }
    std::fs::write(&path, content).expect("write fixture file");
    path
}
