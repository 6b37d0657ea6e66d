//! Host definition for the provisor inventory.
//!
//! A `Host` is a managed node: where to reach it, how to authenticate, and
//! the variables attached to it.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Transport used to reach a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// SSH connection (default)
    #[default]
    Ssh,
    /// Run commands on the controller itself
    Local,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Ssh => write!(f, "ssh"),
            ConnectionType::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ssh" => Ok(ConnectionType::Ssh),
            "local" => Ok(ConnectionType::Local),
            other => Err(format!("unsupported connection type '{}'", other)),
        }
    }
}

/// A managed host in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Inventory name, also the key for facts and results
    pub name: String,

    /// Hostname or IP to connect to, if different from the name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Private key used for SSH authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub connection: ConnectionType,

    /// Run mutating commands through sudo
    #[serde(default)]
    pub r#become: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub become_user: Option<String>,

    /// Host-specific variables
    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,

    /// Groups this host belongs to, in declaration order
    #[serde(skip)]
    pub groups: IndexSet<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let connection = if is_loopback(&name) {
            ConnectionType::Local
        } else {
            ConnectionType::Ssh
        };

        Self {
            name,
            address: None,
            port: None,
            user: None,
            key_file: None,
            password: None,
            connection,
            r#become: false,
            become_user: None,
            vars: IndexMap::new(),
            groups: IndexSet::new(),
        }
    }

    /// Create a new host reachable at `address`
    pub fn with_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        let mut host = Self::new(name);
        host.address = Some(address.into());
        host
    }

    /// Get the actual address to connect to
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }

    pub fn is_local(&self) -> bool {
        self.connection == ConnectionType::Local
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    pub fn get_var(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.vars.get(key)
    }

    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub(crate) fn is_loopback(name: &str) -> bool {
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_defaults() {
        let host = Host::new("web1");
        assert_eq!(host.address(), "web1");
        assert_eq!(host.connection, ConnectionType::Ssh);
        assert!(!host.is_local());
    }

    #[test]
    fn test_localhost_is_local() {
        assert!(Host::new("localhost").is_local());
        assert!(Host::new("127.0.0.1").is_local());
    }

    #[test]
    fn test_with_address() {
        let host = Host::with_address("db1", "10.0.0.5");
        assert_eq!(host.name, "db1");
        assert_eq!(host.address(), "10.0.0.5");
    }

    #[test]
    fn test_connection_type_parse() {
        assert_eq!("LOCAL".parse::<ConnectionType>().unwrap(), ConnectionType::Local);
        assert!("winrm".parse::<ConnectionType>().is_err());
    }
}
