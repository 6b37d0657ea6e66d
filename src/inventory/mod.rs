//! Inventory management for provisor.
//!
//! The inventory is a YAML document of groups, hosts and variables:
//!
//! ```yaml
//! all:
//!   vars:
//!     http_port: 80
//!   children:
//!     webservers:
//!       hosts:
//!         web1:
//!           address: 10.0.0.11
//!           user: deploy
//!         web2:
//!           address: 10.0.0.12
//!     control:
//!       hosts:
//!         localhost:
//!           connection: local
//! ```
//!
//! Host entries recognise the connection keys `address` (alias `host`),
//! `port`, `user`, `key_file` (alias `private_key_file`), `password`,
//! `connection`, `become` and `become_user`; every other key becomes a host
//! variable. Hosts are kept in declaration order so that pattern results are
//! deterministic.

pub mod group;
pub mod host;

pub use group::Group;
pub use host::{ConnectionType, Host};

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("no hosts matched pattern: {0}")]
    NoMatch(String),

    #[error("invalid value for '{key}' on host '{host}': {message}")]
    InvalidHostVar {
        host: String,
        key: String,
        message: String,
    },
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// All hosts and groups known to a run
#[derive(Debug, Clone)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    groups: IndexMap<String, Group>,
    source: Option<String>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with default groups
    pub fn new() -> Self {
        let mut groups = IndexMap::new();
        groups.insert("all".to_string(), Group::all());
        groups.insert("ungrouped".to_string(), Group::ungrouped());

        Self {
            hosts: IndexMap::new(),
            groups,
            source: None,
        }
    }

    /// Load inventory from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> InventoryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut inventory = Self::from_yaml_str(&content)?;
        inventory.source = Some(path.display().to_string());
        debug!(
            source = %path.display(),
            hosts = inventory.host_count(),
            groups = inventory.groups.len(),
            "Loaded inventory"
        );
        Ok(inventory)
    }

    /// Parse inventory from YAML text
    pub fn from_yaml_str(content: &str) -> InventoryResult<Self> {
        let mut inventory = Self::new();
        let data: serde_yaml::Value = serde_yaml::from_str(content)?;

        if let serde_yaml::Value::Mapping(map) = data {
            if let Some(all) = map.get("all") {
                inventory.parse_group("all", all)?;
            } else {
                for (key, value) in &map {
                    if let serde_yaml::Value::String(group_name) = key {
                        inventory.add_child_group("all", group_name);
                        inventory.parse_group(group_name, value)?;
                    }
                }
            }
        }

        inventory.finalize();
        Ok(inventory)
    }

    fn add_child_group(&mut self, parent: &str, child: &str) {
        if parent == child {
            return;
        }
        if let Some(g) = self.groups.get_mut(parent) {
            g.add_child(child.to_string());
        }
    }

    fn parse_group(&mut self, name: &str, value: &serde_yaml::Value) -> InventoryResult<()> {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name));

        let serde_yaml::Value::Mapping(map) = value else {
            return Ok(());
        };

        if let Some(serde_yaml::Value::Mapping(hosts_map)) = map.get("hosts") {
            for (host_key, host_value) in hosts_map {
                let host_name = yaml_key_to_string(host_key);
                self.parse_host(name, &host_name, host_value)?;
            }
        }

        if let Some(serde_yaml::Value::Mapping(children_map)) = map.get("children") {
            for (child_key, child_value) in children_map {
                let child_name = yaml_key_to_string(child_key);
                self.add_child_group(name, &child_name);
                self.parse_group(&child_name, child_value)?;
            }
        }

        if let Some(serde_yaml::Value::Mapping(vars_map)) = map.get("vars") {
            if let Some(g) = self.groups.get_mut(name) {
                for (var_key, var_value) in vars_map {
                    g.set_var(yaml_key_to_string(var_key), var_value.clone());
                }
            }
        }

        Ok(())
    }

    fn parse_host(
        &mut self,
        group: &str,
        host_name: &str,
        value: &serde_yaml::Value,
    ) -> InventoryResult<()> {
        // A host listed in several groups keeps its first position and accumulates settings
        let host = self
            .hosts
            .entry(host_name.to_string())
            .or_insert_with(|| Host::new(host_name));

        if let serde_yaml::Value::Mapping(host_vars) = value {
            for (var_key, var_value) in host_vars {
                let key = yaml_key_to_string(var_key);
                apply_host_var(host, &key, var_value.clone())?;
            }
        }
        host.add_to_group(group.to_string());

        if let Some(g) = self.groups.get_mut(group) {
            g.add_host(host_name.to_string());
        }
        Ok(())
    }

    /// Wire up parents, `all` membership and `ungrouped`
    fn finalize(&mut self) {
        let edges: Vec<(String, String)> = self
            .groups
            .values()
            .flat_map(|g| g.children.iter().map(|c| (g.name.clone(), c.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(g) = self.groups.get_mut(&child) {
                g.add_parent(parent);
            }
        }

        let names: Vec<String> = self.hosts.keys().cloned().collect();
        for name in names {
            if let Some(all) = self.groups.get_mut("all") {
                all.add_host(name.clone());
            }
            if let Some(host) = self.hosts.get_mut(&name) {
                let only_all = host.groups.iter().all(|g| g == "all");
                if only_all {
                    host.add_to_group("ungrouped");
                    if let Some(ungrouped) = self.groups.get_mut("ungrouped") {
                        ungrouped.add_host(name.clone());
                    }
                }
                host.add_to_group("all");
            }
        }
    }

    /// Add a host programmatically; it joins `all` and the given groups
    pub fn add_host(&mut self, mut host: Host, groups: &[&str]) {
        let name = host.name.clone();
        for group in groups {
            self.groups
                .entry(group.to_string())
                .or_insert_with(|| Group::new(*group))
                .add_host(name.clone());
            self.add_child_group("all", group);
            host.add_to_group(group.to_string());
        }
        self.hosts.insert(name, host);
        self.finalize();
    }

    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Resolve a host pattern to hosts, in inventory order.
    ///
    /// Supported forms: `all`, `*`, a host or group name, globs (`web*`),
    /// regexes (`~web[0-9]+`), and combinations joined by `:` (union),
    /// `:&` (intersection) and `:!` (exclusion). A comma is accepted as a
    /// union separator too.
    pub fn get_hosts_for_pattern(&self, pattern: &str) -> InventoryResult<Vec<&Host>> {
        let names = self.resolve_pattern(pattern)?;
        Ok(self
            .hosts
            .values()
            .filter(|h| names.contains(h.name.as_str()))
            .collect())
    }

    fn resolve_pattern(&self, pattern: &str) -> InventoryResult<HashSet<&str>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(InventoryError::InvalidPattern("empty pattern".to_string()));
        }

        if pattern.contains(',') || pattern.contains(':') {
            return self.resolve_complex(pattern);
        }

        self.resolve_single(pattern)
    }

    fn resolve_single(&self, pattern: &str) -> InventoryResult<HashSet<&str>> {
        if pattern == "all" || pattern == "*" {
            return Ok(self.hosts.keys().map(String::as_str).collect());
        }

        if let Some(regex_str) = pattern.strip_prefix('~') {
            let regex = Regex::new(regex_str)
                .map_err(|e| InventoryError::InvalidPattern(format!("{}: {}", pattern, e)))?;
            return Ok(self
                .hosts
                .keys()
                .filter(|name| regex.is_match(name))
                .map(String::as_str)
                .collect());
        }

        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let regex = Regex::new(&glob_to_regex(pattern))
                .map_err(|e| InventoryError::InvalidPattern(format!("{}: {}", pattern, e)))?;
            return Ok(self
                .hosts
                .keys()
                .filter(|name| regex.is_match(name))
                .map(String::as_str)
                .collect());
        }

        if let Some(group) = self.groups.get(pattern) {
            let mut names = HashSet::new();
            self.collect_group_hosts(group, &mut names, &mut HashSet::new());
            return Ok(names);
        }

        if let Some((name, _)) = self.hosts.get_key_value(pattern) {
            return Ok(std::iter::once(name.as_str()).collect());
        }

        Err(InventoryError::NoMatch(pattern.to_string()))
    }

    fn resolve_complex(&self, pattern: &str) -> InventoryResult<HashSet<&str>> {
        let mut result: HashSet<&str> = HashSet::new();

        for part in split_pattern(pattern) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some(sub) = part.strip_prefix('&') {
                let sub_set = self.resolve_single(sub.trim())?;
                result = result.intersection(&sub_set).copied().collect();
            } else if let Some(sub) = part.strip_prefix('!') {
                for name in self.resolve_single(sub.trim())? {
                    result.remove(name);
                }
            } else {
                result.extend(self.resolve_single(part)?);
            }
        }

        Ok(result)
    }

    fn collect_group_hosts<'a>(
        &'a self,
        group: &'a Group,
        names: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) {
        if !visited.insert(group.name.as_str()) {
            return;
        }
        names.extend(group.hosts.iter().map(String::as_str));
        for child_name in &group.children {
            if let Some(child) = self.groups.get(child_name) {
                self.collect_group_hosts(child, names, visited);
            }
        }
    }

    /// Groups of a host ordered from the root (`all`) down to the most specific
    fn group_chain<'a>(&'a self, host: &'a Host) -> Vec<&'a str> {
        fn depth(inventory: &Inventory, name: &str, seen: &mut HashSet<String>) -> usize {
            if !seen.insert(name.to_string()) {
                return 0;
            }
            inventory
                .groups
                .get(name)
                .map(|g| {
                    g.parents
                        .iter()
                        .map(|p| depth(inventory, p, seen) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0)
        }

        let mut ancestors: IndexSet<&'a str> = IndexSet::new();
        let mut stack: Vec<&'a str> = host.groups.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if ancestors.insert(name) {
                if let Some(group) = self.groups.get(name) {
                    stack.extend(group.parents.iter().map(String::as_str));
                }
            }
        }

        let mut chain: Vec<(usize, &'a str)> = ancestors
            .into_iter()
            .map(|name| (depth(self, name, &mut HashSet::new()), name))
            .collect();
        chain.sort_by_key(|(d, _)| *d);
        chain.into_iter().map(|(_, name)| name).collect()
    }

    /// Merged variables for a host: group vars parent to child, then host vars
    pub fn get_host_vars(&self, host: &Host) -> IndexMap<String, serde_yaml::Value> {
        let mut vars = IndexMap::new();

        for group_name in self.group_chain(host) {
            if let Some(group) = self.groups.get(group_name) {
                for (key, value) in &group.vars {
                    vars.insert(key.clone(), value.clone());
                }
            }
        }

        for (key, value) in &host.vars {
            vars.insert(key.clone(), value.clone());
        }

        vars
    }

    /// Host variables converted to JSON values
    pub fn host_vars_json(&self, host: &Host) -> serde_json::Map<String, serde_json::Value> {
        self.get_host_vars(host)
            .into_iter()
            .map(|(k, v)| (k, yaml_to_json(&v)))
            .collect()
    }
}

fn apply_host_var(host: &mut Host, key: &str, value: serde_yaml::Value) -> InventoryResult<()> {
    let host_name = host.name.clone();
    let invalid = |message: &str| InventoryError::InvalidHostVar {
        host: host_name.clone(),
        key: key.to_string(),
        message: message.to_string(),
    };

    match key {
        "address" | "host" => {
            host.address = Some(scalar_string(&value).ok_or_else(|| invalid("expected a string"))?);
        }
        "port" => {
            let port = match &value {
                serde_yaml::Value::Number(n) => n.as_u64(),
                serde_yaml::Value::String(s) => s.parse().ok(),
                _ => None,
            }
            .filter(|p| *p > 0 && *p <= u16::MAX as u64)
            .ok_or_else(|| invalid("expected a port number"))?;
            host.port = Some(port as u16);
        }
        "user" => {
            host.user = Some(scalar_string(&value).ok_or_else(|| invalid("expected a string"))?);
        }
        "key_file" | "private_key_file" => {
            host.key_file =
                Some(scalar_string(&value).ok_or_else(|| invalid("expected a path"))?);
        }
        "password" => {
            host.password =
                Some(scalar_string(&value).ok_or_else(|| invalid("expected a string"))?);
        }
        "connection" => {
            let s = scalar_string(&value).ok_or_else(|| invalid("expected ssh or local"))?;
            host.connection = s.parse().map_err(|e: String| invalid(&e))?;
        }
        "become" => {
            host.r#become = match value {
                serde_yaml::Value::Bool(b) => b,
                serde_yaml::Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "yes" | "1"),
                _ => return Err(invalid("expected a boolean")),
            };
        }
        "become_user" => {
            host.become_user =
                Some(scalar_string(&value).ok_or_else(|| invalid("expected a string"))?);
        }
        _ => host.set_var(key, value),
    }

    Ok(())
}

fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn yaml_key_to_string(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Convert a YAML value to JSON, stringifying non-string mapping keys
pub fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => {
            serde_json::Value::Array(seq.iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (yaml_key_to_string(k), yaml_to_json(v)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Split pattern on `:` and `,` but not inside brackets
fn split_pattern(pattern: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut bracket_depth: usize = 0;

    for (i, ch) in pattern.char_indices() {
        match ch {
            '[' => bracket_depth += 1,
            ']' => bracket_depth = bracket_depth.saturating_sub(1),
            ':' | ',' if bracket_depth == 0 => {
                parts.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    parts.push(&pattern[start..]);
    parts
}

/// Convert a glob pattern to an anchored regex
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");

    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '(' | ')' | '{' | '}' | '.' | '+' | '^' | '$' | '|' | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            _ => regex.push(ch),
        }
    }

    regex.push('$');
    regex
}
