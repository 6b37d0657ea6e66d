//! Configuration module for provisor
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/provisor/provisor.toml)
//! - User configuration (~/.provisor.toml)
//! - Project configuration (./provisor.toml)
//! - `$PROVISOR_CONFIG`
//! - Environment variables
//!
//! Later files override earlier ones key by key. Command-line flags are
//! applied on top by the command context.

use anyhow::{Context, Result};
use provisor::connection::{RetryConfig, SshSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub connection: ConnectionConfig,
    pub reports: ReportsConfig,
    pub logging: LoggingConfig,
}

/// Default run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Default inventory path
    pub inventory: Option<PathBuf>,

    /// Hosts executing concurrently
    pub forks: usize,

    /// Run-level timeout in seconds
    pub timeout: Option<u64>,

    /// Per-command timeout in seconds
    pub command_timeout: Option<u64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            inventory: None,
            forks: 5,
            timeout: None,
            command_timeout: None,
        }
    }
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Remote user when the inventory doesn't name one
    pub user: Option<String>,
    pub port: u16,
    /// Connect timeout in seconds
    pub connect_timeout: u64,
    pub accept_unknown_hosts: bool,
    pub retry: RetrySettings,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let ssh = SshSettings::default();
        Self {
            user: None,
            port: ssh.port,
            connect_timeout: ssh.connect_timeout,
            accept_unknown_hosts: ssh.accept_unknown_hosts,
            retry: RetrySettings::default(),
        }
    }
}

/// Connection retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_retries: retry.max_retries,
            delay_ms: retry.retry_delay.as_millis() as u64,
        }
    }
}

/// Report output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsConfig {
    /// Where per-host reports are written
    pub dir: PathBuf,
    /// Target directory exposed to playbooks as `target_dir`
    pub target_dir: Option<PathBuf>,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
            target_dir: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level used when neither `-v` nor `RUST_LOG` is given
    pub level: Option<String>,

    /// Emit JSON log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut merged = serde_json::Value::Object(serde_json::Map::new());

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                let layer = Self::read_file(&path)?;
                merge_values(&mut merged, layer);
            } else if config_path == Some(&path) {
                anyhow::bail!("config file not found: {}", path.display());
            }
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid configuration")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the list of configuration file paths to check, lowest priority first
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // Explicit path replaces the search
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        let mut paths = vec![PathBuf::from("/etc/provisor/provisor.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".provisor.toml"));
        }
        paths.push(PathBuf::from("provisor.toml"));
        if let Ok(env_config) = std::env::var("PROVISOR_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }
        paths
    }

    /// Parse one file into a generic value, by extension
    fn read_file(path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let value: serde_json::Value = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(value)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // PROVISOR_FORKS
        if let Ok(forks) = std::env::var("PROVISOR_FORKS") {
            if let Ok(n) = forks.parse() {
                self.defaults.forks = n;
            }
        }

        // PROVISOR_TIMEOUT
        if let Ok(timeout) = std::env::var("PROVISOR_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.defaults.timeout = Some(n);
            }
        }

        // PROVISOR_REPORTS_DIR
        if let Ok(dir) = std::env::var("PROVISOR_REPORTS_DIR") {
            self.reports.dir = PathBuf::from(dir);
        }

        // PROVISOR_REMOTE_USER
        if let Ok(user) = std::env::var("PROVISOR_REMOTE_USER") {
            self.connection.user = Some(user);
        }
    }

    pub fn ssh_settings(&self) -> SshSettings {
        let mut settings = SshSettings::default();
        settings.user = self.connection.user.clone();
        settings.port = self.connection.port;
        settings.connect_timeout = self.connection.connect_timeout;
        settings.accept_unknown_hosts = self.connection.accept_unknown_hosts;
        settings
    }

    pub fn retry_config(&self) -> RetryConfig {
        let mut retry = RetryConfig::default();
        retry.max_retries = self.connection.retry.max_retries;
        retry.retry_delay = Duration::from_millis(self.connection.retry.delay_ms);
        retry
    }
}

/// Deep-merge `overlay` into `base`; tables merge, everything else replaces
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.forks, 5);
        assert_eq!(config.connection.port, 22);
        assert_eq!(config.connection.retry.max_retries, 0);
        assert_eq!(config.reports.dir, PathBuf::from("reports"));
        assert!(!config.logging.json);
    }

    #[test]
    fn test_merge_values_is_deep() {
        let mut base = serde_json::json!({"defaults": {"forks": 10, "timeout": 60}});
        merge_values(
            &mut base,
            serde_json::json!({"defaults": {"forks": 2}, "logging": {"json": true}}),
        );
        assert_eq!(
            base,
            serde_json::json!({
                "defaults": {"forks": 2, "timeout": 60},
                "logging": {"json": true}
            })
        );
    }

    #[test]
    #[serial]
    fn test_explicit_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisor.yaml");
        std::fs::write(
            &path,
            "defaults:\n  forks: 12\nconnection:\n  user: deploy\n  retry:\n    max_retries: 3\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.defaults.forks, 12);
        assert_eq!(config.ssh_settings().user.as_deref(), Some("deploy"));
        assert_eq!(config.retry_config().max_retries, 3);
        assert_eq!(config.connection.port, 22);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        let path = PathBuf::from("/nonexistent/provisor.toml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("PROVISOR_FORKS", "20");
        std::env::set_var("PROVISOR_REPORTS_DIR", "/tmp/out");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.defaults.forks, 20);
        assert_eq!(config.reports.dir, PathBuf::from("/tmp/out"));
        std::env::remove_var("PROVISOR_FORKS");
        std::env::remove_var("PROVISOR_REPORTS_DIR");
    }
}
