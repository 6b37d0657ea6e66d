//! Task actions for provisor
//!
//! Every task names exactly one [`Action`]. Actions are idempotent: each one
//! queries current state first and only mutates when the state differs from
//! the request, reporting [`OutcomeKind::AlreadySatisfied`] otherwise. In
//! check mode the mutating step is replaced by [`OutcomeKind::WouldChange`].

pub mod copy;
pub mod debug;
pub mod download;
pub mod file;
pub mod package;
pub mod report;
pub mod service;
pub mod shell;
pub mod stat;
pub mod template;

pub use copy::CopyArgs;
pub use debug::DebugArgs;
pub use download::DownloadArgs;
pub use file::{FileArgs, FileState};
pub use package::{PackageArgs, PackageManager, PackageState};
pub use report::ReportArgs;
pub use service::{ServiceArgs, ServiceState};
pub use shell::ShellArgs;
pub use stat::StatArgs;
pub use template::TemplateArgs;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::connection::{
    escape_shell_arg, CommandResult, Connection, ConnectionError, ExecuteOptions,
};
use crate::facts::Facts;
use crate::report::{ReportError, ReportRenderer};
use crate::template::{TemplateEngine, TemplateError};

/// Errors that fail a task
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("'{command}' failed with exit code {rc}: {stderr}")]
    CommandFailed {
        command: String,
        rc: i32,
        stderr: String,
    },

    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("failed to read '{path}' on the controller: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for action execution
pub type ActionResult<T> = Result<T, ActionError>;

/// The action a task performs, tagged by its YAML key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[serde(alias = "command")]
    Shell(ShellArgs),
    #[serde(alias = "apt", alias = "yum", alias = "dnf")]
    Package(PackageArgs),
    Service(ServiceArgs),
    Stat(StatArgs),
    Copy(CopyArgs),
    #[serde(alias = "get_url")]
    Download(DownloadArgs),
    File(FileArgs),
    Template(TemplateArgs),
    Report(ReportArgs),
    Debug(DebugArgs),
}

impl Action {
    /// Every key accepted as an action name, aliases included
    pub const KEYS: &'static [&'static str] = &[
        "shell", "command", "package", "apt", "yum", "dnf", "service", "stat", "copy",
        "download", "get_url", "file", "template", "report", "debug",
    ];

    pub fn is_action_key(key: &str) -> bool {
        Self::KEYS.contains(&key)
    }

    /// Canonical action name
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Shell(_) => "shell",
            Action::Package(_) => "package",
            Action::Service(_) => "service",
            Action::Stat(_) => "stat",
            Action::Copy(_) => "copy",
            Action::Download(_) => "download",
            Action::File(_) => "file",
            Action::Template(_) => "template",
            Action::Report(_) => "report",
            Action::Debug(_) => "debug",
        }
    }

    /// Reports are always written on the controller
    pub fn forces_controller(key: &str) -> bool {
        key == "report"
    }

    /// Only shell probes may opt out of check mode with `check_mode: false`
    pub fn may_skip_check_mode(&self) -> bool {
        matches!(self, Action::Shell(_))
    }

    /// Build an action from its key and argument value
    pub fn from_parts(key: &str, args: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut map = serde_json::Map::with_capacity(1);
        map.insert(key.to_string(), args.clone());
        serde_json::from_value(serde_json::Value::Object(map))
    }

    /// Execute the action
    pub async fn execute(&self, ctx: &ModuleContext<'_>) -> ActionResult<ModuleOutput> {
        match self {
            Action::Shell(args) => shell::execute(args, ctx).await,
            Action::Package(args) => package::execute(args, ctx).await,
            Action::Service(args) => service::execute(args, ctx).await,
            Action::Stat(args) => stat::execute(args, ctx).await,
            Action::Copy(args) => copy::execute(args, ctx).await,
            Action::Download(args) => download::execute(args, ctx).await,
            Action::File(args) => file::execute(args, ctx).await,
            Action::Template(args) => template::execute(args, ctx).await,
            Action::Report(args) => report::execute(args, ctx).await,
            Action::Debug(args) => debug::execute(args, ctx).await,
        }
    }
}

/// How an action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// State was modified
    Changed,
    /// Ran without modifying anything (reads, messages)
    Ok,
    /// Current state already matched the request
    AlreadySatisfied,
    /// Check mode: the mutating step was not issued
    WouldChange,
    /// The action ran and reported failure
    Failed,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Changed => "changed",
            OutcomeKind::Ok => "ok",
            OutcomeKind::AlreadySatisfied => "already satisfied",
            OutcomeKind::WouldChange => "would change",
            OutcomeKind::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What an action reports back to the executor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleOutput {
    pub kind: OutcomeKind,
    pub msg: String,
    pub rc: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Action specific fields merged into the stored result
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl ModuleOutput {
    fn with_kind(kind: OutcomeKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            rc: None,
            stdout: None,
            stderr: None,
            data: serde_json::Map::new(),
        }
    }

    pub fn changed(msg: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::Changed, msg)
    }

    pub fn ok(msg: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::Ok, msg)
    }

    pub fn satisfied(msg: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::AlreadySatisfied, msg)
    }

    pub fn would_change(msg: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::WouldChange, msg)
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::with_kind(OutcomeKind::Failed, msg)
    }

    /// Attach exit code and output of a command
    pub fn with_command(mut self, result: &CommandResult) -> Self {
        self.rc = Some(result.exit_code);
        self.stdout = Some(result.stdout.trim_end().to_string());
        self.stderr = Some(result.stderr.trim_end().to_string());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn changed_anything(&self) -> bool {
        self.kind == OutcomeKind::Changed
    }
}

/// Everything an action may use while executing on one host
pub struct ModuleContext<'a> {
    /// Inventory name of the target host
    pub host: &'a str,
    /// Channel the action runs against (the controller for delegated tasks)
    pub connection: &'a dyn Connection,
    pub on_controller: bool,
    pub check_mode: bool,
    pub r#become: bool,
    pub become_user: Option<&'a str>,
    pub facts: &'a Facts,
    /// Store snapshot used for rendering
    pub context: &'a serde_json::Value,
    pub templates: &'a TemplateEngine,
    pub reports: &'a ReportRenderer,
    pub run_timestamp: &'a str,
    pub command_timeout: Option<u64>,
    /// Directory relative controller paths are resolved against
    pub base_dir: &'a Path,
}

impl<'a> ModuleContext<'a> {
    pub fn exec_options(&self) -> ExecuteOptions {
        let mut options = ExecuteOptions::new();
        if let Some(timeout) = self.command_timeout {
            options = options.with_timeout(timeout);
        }
        if self.r#become {
            options = options.with_escalation(self.become_user.map(String::from));
        }
        options
    }

    /// Run a command, returning its result whatever the exit code
    pub async fn run(&self, command: &str) -> ActionResult<CommandResult> {
        Ok(self
            .connection
            .execute(command, Some(self.exec_options()))
            .await?)
    }

    /// Run a command and fail on a non-zero exit code
    pub async fn run_checked(&self, command: &str) -> ActionResult<CommandResult> {
        let result = self.run(command).await?;
        if result.success {
            Ok(result)
        } else {
            Err(ActionError::CommandFailed {
                command: command.to_string(),
                rc: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }

    /// Resolve a controller-side path against the playbook directory
    pub fn local_path(&self, path: &str) -> PathBuf {
        let expanded = crate::connection::expand_path(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    /// Read a file on the controller
    pub async fn read_local(&self, path: &str) -> ActionResult<(PathBuf, Vec<u8>)> {
        let resolved = self.local_path(path);
        let content = tokio::fs::read(&resolved)
            .await
            .map_err(|source| ActionError::LocalIo {
                path: resolved.display().to_string(),
                source,
            })?;
        Ok((resolved, content))
    }

    /// SHA-256 of a file on the action's channel, `None` if it does not exist
    pub async fn remote_checksum(&self, path: &str) -> ActionResult<Option<String>> {
        if !self.connection.path_exists(Path::new(path)).await? {
            return Ok(None);
        }
        let quoted = escape_shell_arg(path);
        let command = format!(
            "sha256sum {0} 2>/dev/null || shasum -a 256 {0}",
            quoted
        );
        let result = self.run_checked(&command).await?;
        let digest = result
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_lowercase)
            .ok_or_else(|| ActionError::CommandFailed {
                command,
                rc: result.exit_code,
                stderr: "empty checksum output".to_string(),
            })?;
        Ok(Some(digest))
    }
}

/// File mode given as an octal string (`"0644"`) or a YAML integer (`644`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeArg {
    Number(u32),
    Text(String),
}

impl ModeArg {
    /// Permission bits
    pub fn bits(&self) -> ActionResult<u32> {
        let digits = match self {
            ModeArg::Number(n) => n.to_string(),
            ModeArg::Text(s) => s.trim().trim_start_matches("0o").to_string(),
        };
        let bits = u32::from_str_radix(&digits, 8)
            .map_err(|_| ActionError::InvalidArgs(format!("invalid file mode '{}'", digits)))?;
        if bits > 0o7777 {
            return Err(ActionError::InvalidArgs(format!(
                "file mode '{}' out of range",
                digits
            )));
        }
        Ok(bits)
    }
}

/// Lowercase hex SHA-256
pub fn sha256_hex(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_from_parts_with_aliases() {
        let action = Action::from_parts("command", &json!("uptime")).unwrap();
        assert_eq!(action.kind(), "shell");

        let action = Action::from_parts("apt", &json!({"name": "nginx"})).unwrap();
        assert_eq!(action.kind(), "package");

        let action = Action::from_parts("get_url", &json!({"url": "https://x/y", "dest": "/tmp/y"}))
            .unwrap();
        assert_eq!(action.kind(), "download");
    }

    #[test]
    fn test_unknown_action_key_rejected() {
        assert!(Action::from_parts("lineinfile", &json!({})).is_err());
        assert!(!Action::is_action_key("lineinfile"));
        assert!(Action::is_action_key("get_url"));
    }

    #[test]
    fn test_report_forces_controller() {
        assert!(Action::forces_controller("report"));
        assert!(!Action::forces_controller("template"));
    }

    #[test]
    fn test_only_shell_may_skip_check_mode() {
        let shell = Action::from_parts("command", &json!("uptime")).unwrap();
        assert!(shell.may_skip_check_mode());

        let package = Action::from_parts("package", &json!({"name": "nginx"})).unwrap();
        assert!(!package.may_skip_check_mode());
    }

    #[test]
    fn test_mode_arg() {
        assert_eq!(ModeArg::Text("0644".into()).bits().unwrap(), 0o644);
        assert_eq!(ModeArg::Number(755).bits().unwrap(), 0o755);
        assert_eq!(ModeArg::Text("0o600".into()).bits().unwrap(), 0o600);
        assert!(ModeArg::Text("rw-r--r--".into()).bits().is_err());
        assert!(ModeArg::Number(99999).bits().is_err());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
