//! Connection configuration module
//!
//! SSH defaults that apply to every inventory host, the retry policy used
//! when opening channels, and path expansion helpers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default connection timeout in seconds
pub const DEFAULT_TIMEOUT: u64 = 10;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default delay between retries in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// SSH settings shared by all hosts; inventory entries override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Remote user when the host entry doesn't name one
    pub user: Option<String>,
    /// Port when the host entry doesn't name one
    pub port: u16,
    /// TCP connect and handshake timeout in seconds
    pub connect_timeout: u64,
    /// Accept hosts missing from known_hosts (like StrictHostKeyChecking=accept-new)
    pub accept_unknown_hosts: bool,
    /// Identity files tried after the host's own key file
    pub identity_files: Vec<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: None,
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_TIMEOUT,
            accept_unknown_hosts: true,
            identity_files: Vec::new(),
        }
    }
}

impl SshSettings {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Effective remote user: explicit setting, then `$USER`, then root.
    pub fn effective_user(&self, host_user: Option<&str>) -> String {
        host_user
            .map(String::from)
            .or_else(|| self.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 disables retrying)
    pub max_retries: u32,

    /// Initial delay between retries
    pub retry_delay: Duration,

    /// Use exponential backoff
    pub exponential_backoff: bool,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            exponential_backoff: true,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given retry attempt (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.exponential_backoff {
            let delay = self.retry_delay * 2u32.pow(attempt.min(10));
            delay.min(self.max_delay)
        } else {
            self.retry_delay
        }
    }
}

/// Expand `~` and environment variables in a path
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or_else(|_| path.into());
    PathBuf::from(expanded.as_ref())
}

/// Default identity files that exist under ~/.ssh
pub fn default_identity_files() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    let ssh_dir = home.join(".ssh");

    vec![
        ssh_dir.join("id_ed25519"),
        ssh_dir.join("id_ecdsa"),
        ssh_dir.join("id_rsa"),
    ]
    .into_iter()
    .filter(|p| p.exists())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SshSettings::default();
        assert_eq!(settings.port, 22);
        assert_eq!(settings.connect_timeout, DEFAULT_TIMEOUT);
        assert!(settings.accept_unknown_hosts);
    }

    #[test]
    fn test_effective_user_prefers_host() {
        let settings = SshSettings {
            user: Some("ops".into()),
            ..SshSettings::default()
        };
        assert_eq!(settings.effective_user(Some("deploy")), "deploy");
        assert_eq!(settings.effective_user(None), "ops");
    }

    #[test]
    fn test_retry_delay_backoff() {
        let retry = RetryConfig {
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            exponential_backoff: true,
            max_delay: Duration::from_secs(5),
        };

        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_disabled_by_default() {
        assert_eq!(RetryConfig::default().max_retries, 0);
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/.ssh/id_rsa");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
