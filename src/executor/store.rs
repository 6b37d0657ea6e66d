//! Fact/result store
//!
//! Results are partitioned per host; each host's worker is the only writer
//! to its partition. A separate run-scoped partition holds run-once results
//! and is readable from every host. Keys are write-once in both partitions.

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::facts::Facts;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("result key '{key}' already recorded for host '{host}'")]
    KeyExists { host: String, key: String },

    #[error("run-once result key '{0}' already published")]
    RunKeyExists(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only result store for one run
#[derive(Debug, Default)]
pub struct ResultStore {
    hosts: DashMap<String, IndexMap<String, Value>>,
    run_scoped: RwLock<IndexMap<String, Value>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a host result; existing keys are never overwritten
    pub fn put(&self, host: &str, key: &str, value: Value) -> StoreResult<()> {
        if self.run_scoped.read().contains_key(key) {
            return Err(StoreError::KeyExists {
                host: host.to_string(),
                key: key.to_string(),
            });
        }
        let mut partition = self.hosts.entry(host.to_string()).or_default();
        if partition.contains_key(key) {
            return Err(StoreError::KeyExists {
                host: host.to_string(),
                key: key.to_string(),
            });
        }
        partition.insert(key.to_string(), value);
        Ok(())
    }

    /// Publish a run-once result for all hosts
    pub fn publish(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut run = self.run_scoped.write();
        if run.contains_key(key) {
            return Err(StoreError::RunKeyExists(key.to_string()));
        }
        run.insert(key.to_string(), value);
        Ok(())
    }

    /// Host partition first, then the run-scoped partition
    pub fn get(&self, host: &str, key: &str) -> Option<Value> {
        if let Some(partition) = self.hosts.get(host) {
            if let Some(value) = partition.get(key) {
                return Some(value.clone());
            }
        }
        self.run_scoped.read().get(key).cloned()
    }

    pub fn contains(&self, host: &str, key: &str) -> bool {
        self.get(host, key).is_some()
    }

    /// Every result visible to a host, in recording order
    pub fn host_results(&self, host: &str) -> IndexMap<String, Value> {
        let mut results = self.run_scoped.read().clone();
        if let Some(partition) = self.hosts.get(host) {
            for (k, v) in partition.iter() {
                results.insert(k.clone(), v.clone());
            }
        }
        results
    }

    /// Immutable view used for predicates and rendering
    ///
    /// Top-level names resolve with precedence vars < facts < results, and
    /// each layer is also reachable under `vars`, `facts` and `results`.
    pub fn snapshot(&self, host: &str, vars: &Map<String, Value>, facts: &Facts) -> Value {
        let results = self.host_results(host);
        let facts_json = facts.to_json();

        let mut root = Map::new();
        for (k, v) in vars {
            root.insert(k.clone(), v.clone());
        }
        if let Value::Object(facts_map) = &facts_json {
            for (k, v) in facts_map {
                root.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &results {
            root.insert(k.clone(), v.clone());
        }

        root.insert("vars".to_string(), Value::Object(vars.clone()));
        root.insert("facts".to_string(), facts_json);
        root.insert(
            "results".to_string(),
            Value::Object(results.into_iter().collect()),
        );
        root.insert(
            "inventory_hostname".to_string(),
            Value::String(host.to_string()),
        );
        Value::Object(root)
    }

    /// Drop everything; called between runs
    pub fn clear(&self) {
        self.hosts.clear();
        self.run_scoped.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_is_write_once() {
        let store = ResultStore::new();
        store.put("web1", "probe", json!({"rc": 0})).unwrap();
        let err = store.put("web1", "probe", json!({"rc": 1})).unwrap_err();
        assert_eq!(
            err,
            StoreError::KeyExists {
                host: "web1".into(),
                key: "probe".into()
            }
        );
        assert_eq!(store.get("web1", "probe"), Some(json!({"rc": 0})));
    }

    #[test]
    fn test_hosts_are_isolated() {
        let store = ResultStore::new();
        store.put("web1", "probe", json!(1)).unwrap();
        store.put("web2", "probe", json!(2)).unwrap();
        assert_eq!(store.get("web1", "probe"), Some(json!(1)));
        assert_eq!(store.get("web2", "probe"), Some(json!(2)));
        assert_eq!(store.get("web3", "probe"), None);
    }

    #[test]
    fn test_run_scoped_visible_to_all_hosts() {
        let store = ResultStore::new();
        store.publish("bundle", json!({"status": "succeeded"})).unwrap();
        assert!(store.contains("web1", "bundle"));
        assert!(store.contains("web2", "bundle"));
        assert!(store.publish("bundle", json!({})).is_err());
        assert!(store.put("web1", "bundle", json!({})).is_err());
    }

    #[test]
    fn test_snapshot_precedence() {
        let store = ResultStore::new();
        let mut facts = Facts::default();
        facts.set("os_family", json!("Debian"));
        let mut vars = Map::new();
        vars.insert("os_family".into(), json!("override-me"));
        vars.insert("port".into(), json!(80));
        store.put("web1", "check", json!({"rc": 3})).unwrap();

        let snap = store.snapshot("web1", &vars, &facts);
        assert_eq!(snap["os_family"], json!("Debian"));
        assert_eq!(snap["port"], json!(80));
        assert_eq!(snap["check"]["rc"], json!(3));
        assert_eq!(snap["results"]["check"]["rc"], json!(3));
        assert_eq!(snap["vars"]["os_family"], json!("override-me"));
        assert_eq!(snap["inventory_hostname"], json!("web1"));
    }

    #[test]
    fn test_clear() {
        let store = ResultStore::new();
        store.put("web1", "a", json!(1)).unwrap();
        store.publish("b", json!(2)).unwrap();
        store.clear();
        assert!(store.host_results("web1").is_empty());
    }
}
