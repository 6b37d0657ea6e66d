//! Group definition for the provisor inventory.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// A group of hosts with shared variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,

    /// Host names belonging directly to this group
    #[serde(default)]
    pub hosts: IndexSet<String>,

    /// Child group names
    #[serde(default)]
    pub children: IndexSet<String>,

    /// Parent group names (computed from children relationships)
    #[serde(skip)]
    pub parents: IndexSet<String>,

    #[serde(default)]
    pub vars: IndexMap<String, serde_yaml::Value>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: IndexSet::new(),
            children: IndexSet::new(),
            parents: IndexSet::new(),
            vars: IndexMap::new(),
        }
    }

    /// Create the special "all" group
    pub fn all() -> Self {
        Self::new("all")
    }

    /// Create the special "ungrouped" group
    pub fn ungrouped() -> Self {
        Self::new("ungrouped")
    }

    pub fn add_host(&mut self, host: impl Into<String>) {
        self.hosts.insert(host.into());
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn add_child(&mut self, child: impl Into<String>) {
        self.children.insert(child.into());
    }

    pub fn add_parent(&mut self, parent: impl Into<String>) {
        self.parents.insert(parent.into());
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: serde_yaml::Value) {
        self.vars.insert(key.into(), value);
    }

    /// Merge variables; existing keys are overwritten
    pub fn merge_vars(&mut self, other: &IndexMap<String, serde_yaml::Value>) {
        for (key, value) in other {
            self.vars.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_membership() {
        let mut group = Group::new("webservers");
        group.add_host("web1");
        group.add_host("web2");
        group.add_host("web1");
        group.add_child("canary");

        assert_eq!(group.hosts.len(), 2);
        assert!(group.has_host("web2"));
        assert!(group.children.contains("canary"));
    }

    #[test]
    fn test_merge_vars_overwrites() {
        let mut group = Group::all();
        group.set_var("http_port", serde_yaml::Value::from(80));

        let mut other = IndexMap::new();
        other.insert("http_port".to_string(), serde_yaml::Value::from(8080));
        group.merge_vars(&other);

        assert_eq!(group.vars["http_port"], serde_yaml::Value::from(8080));
    }
}
