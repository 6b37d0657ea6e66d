//! System facts gathering for provisor
//!
//! [`FactCollector::gather`] runs a fixed battery of read-only probes over a
//! host's channel. A probe that fails does not abort the others: the facts
//! it would have produced are set to `null` and listed under `unavailable`.
//! [`FactCache`] keeps one [`Facts`] set per host for the duration of a run.

use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionError, ExecuteOptions};

/// Seconds each probe may take before it is marked unavailable
const PROBE_TIMEOUT_SECS: u64 = 15;

/// Why a single probe produced no facts
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe '{probe}' could not run: {source}")]
    Channel {
        probe: &'static str,
        #[source]
        source: ConnectionError,
    },

    #[error("probe '{probe}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        probe: &'static str,
        exit_code: i32,
        stderr: String,
    },

    #[error("probe '{probe}' returned unparseable output: {detail}")]
    Unparseable { probe: &'static str, detail: String },
}

/// A fact that could not be collected and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableFact {
    pub fact: String,
    pub reason: String,
}

/// Facts gathered from a host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    data: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    unavailable: Vec<UnavailableFact>,
}

impl Facts {
    /// Create empty facts
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Get a fact
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get all facts
    pub fn all(&self) -> &IndexMap<String, serde_json::Value> {
        &self.data
    }

    /// Record a fact as null with the probe failure that caused it
    pub fn mark_unavailable(&mut self, fact: &str, reason: &ProbeError) {
        self.data.insert(fact.to_string(), serde_json::Value::Null);
        self.unavailable.push(UnavailableFact {
            fact: fact.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn unavailable(&self) -> &[UnavailableFact] {
        &self.unavailable
    }

    pub fn is_available(&self, fact: &str) -> bool {
        matches!(self.data.get(fact), Some(v) if !v.is_null())
    }

    /// JSON object of every fact plus the `unavailable` list
    pub fn to_json(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert(
            "unavailable".to_string(),
            json!(self.unavailable.iter().map(|u| &u.fact).collect::<Vec<_>>()),
        );
        serde_json::Value::Object(map)
    }
}

/// One read-only probe: a command and the facts parsed from its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    OsRelease,
    Hostname,
    Kernel,
    Architecture,
    DateTime,
}

impl Probe {
    const ALL: [Probe; 5] = [
        Probe::OsRelease,
        Probe::Hostname,
        Probe::Kernel,
        Probe::Architecture,
        Probe::DateTime,
    ];

    fn name(self) -> &'static str {
        match self {
            Probe::OsRelease => "os_release",
            Probe::Hostname => "hostname",
            Probe::Kernel => "kernel",
            Probe::Architecture => "architecture",
            Probe::DateTime => "date_time",
        }
    }

    fn command(self) -> &'static str {
        match self {
            Probe::OsRelease => "cat /etc/os-release",
            Probe::Hostname => "hostname",
            Probe::Kernel => "uname -r",
            Probe::Architecture => "uname -m",
            Probe::DateTime => "date +%Y-%m-%dT%H:%M:%S%:z",
        }
    }

    /// Facts this probe is responsible for
    fn facts(self) -> &'static [&'static str] {
        match self {
            Probe::OsRelease => &["os_family", "distribution", "distribution_version"],
            Probe::Hostname => &["hostname"],
            Probe::Kernel => &["kernel"],
            Probe::Architecture => &["architecture"],
            Probe::DateTime => &["date_time"],
        }
    }

    fn parse(self, stdout: &str) -> Result<Vec<(&'static str, serde_json::Value)>, ProbeError> {
        let trimmed = stdout.trim();
        let unparseable = |detail: String| ProbeError::Unparseable {
            probe: self.name(),
            detail,
        };

        match self {
            Probe::OsRelease => parse_os_release(trimmed).ok_or_else(|| {
                unparseable("no ID field in /etc/os-release".to_string())
            }),
            Probe::Hostname | Probe::Kernel | Probe::Architecture => {
                if trimmed.is_empty() {
                    return Err(unparseable("empty output".to_string()));
                }
                Ok(vec![(self.facts()[0], json!(trimmed))])
            }
            Probe::DateTime => {
                let parsed = DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%:z")
                    .map_err(|e| unparseable(format!("'{}': {}", trimmed, e)))?;
                Ok(vec![("date_time", date_time_fact(&parsed))])
            }
        }
    }
}

fn parse_os_release(content: &str) -> Option<Vec<(&'static str, serde_json::Value)>> {
    let fields: IndexMap<&str, &str> = content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .collect();

    let id = *fields.get("ID")?;
    let id_like = fields.get("ID_LIKE").copied().unwrap_or("");
    let name = fields.get("NAME").copied().unwrap_or(id);
    let version = fields.get("VERSION_ID").copied();

    Some(vec![
        ("os_family", json!(os_family(id, id_like))),
        ("distribution", json!(name)),
        ("distribution_version", json!(version)),
    ])
}

/// Map an os-release ID (and ID_LIKE) to a family name
pub fn os_family(id: &str, id_like: &str) -> String {
    let candidates = std::iter::once(id).chain(id_like.split_whitespace());
    for candidate in candidates {
        let family = match candidate.to_lowercase().as_str() {
            "debian" | "ubuntu" | "linuxmint" | "pop" | "raspbian" => Some("Debian"),
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "amzn" => Some("RedHat"),
            "arch" | "manjaro" | "endeavouros" => Some("Archlinux"),
            "alpine" => Some("Alpine"),
            "suse" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => Some("Suse"),
            _ => None,
        };
        if let Some(family) = family {
            return family.to_string();
        }
    }

    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Unknown".to_string(),
    }
}

fn date_time_fact(dt: &DateTime<FixedOffset>) -> serde_json::Value {
    json!({
        "date": dt.format("%Y-%m-%d").to_string(),
        "time": dt.format("%H:%M:%S").to_string(),
        "iso8601": dt.to_rfc3339(),
        "epoch": dt.timestamp(),
        "tz_offset": dt.format("%:z").to_string(),
    })
}

/// Runs the probe battery against a channel
#[derive(Debug, Default, Clone, Copy)]
pub struct FactCollector;

impl FactCollector {
    pub fn new() -> Self {
        Self
    }

    /// Gather facts; never fails as a whole
    pub async fn gather(&self, connection: &dyn Connection) -> Facts {
        let mut facts = Facts::new();

        for probe in Probe::ALL {
            match self.run_probe(connection, probe).await {
                Ok(values) => {
                    for (key, value) in values {
                        facts.set(key, value);
                    }
                }
                Err(e) => {
                    warn!(
                        host = %connection.identifier(),
                        probe = probe.name(),
                        error = %e,
                        "Fact probe failed, marking facts unavailable"
                    );
                    for fact in probe.facts() {
                        facts.mark_unavailable(fact, &e);
                    }
                }
            }
        }

        debug!(
            host = %connection.identifier(),
            facts = facts.all().len(),
            unavailable = facts.unavailable().len(),
            "Gathered facts"
        );
        facts
    }

    async fn run_probe(
        &self,
        connection: &dyn Connection,
        probe: Probe,
    ) -> Result<Vec<(&'static str, serde_json::Value)>, ProbeError> {
        let options = ExecuteOptions::new().with_timeout(PROBE_TIMEOUT_SECS);
        let result = connection
            .execute(probe.command(), Some(options))
            .await
            .map_err(|source| ProbeError::Channel {
                probe: probe.name(),
                source,
            })?;

        if !result.success {
            return Err(ProbeError::NonZeroExit {
                probe: probe.name(),
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        probe.parse(&result.stdout)
    }
}

/// Per-run cache of gathered facts keyed by inventory host name
#[derive(Debug, Default)]
pub struct FactCache {
    entries: DashMap<String, Arc<Facts>>,
    collector: FactCollector,
}

impl FactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts for `host`, gathering them on first use
    pub async fn get_or_gather(&self, host: &str, connection: &dyn Connection) -> Arc<Facts> {
        if let Some(facts) = self.entries.get(host) {
            return facts.clone();
        }

        let facts = Arc::new(self.collector.gather(connection).await);
        self.entries
            .entry(host.to_string())
            .or_insert(facts)
            .clone()
    }

    pub fn get(&self, host: &str) -> Option<Arc<Facts>> {
        self.entries.get(host).map(|f| f.clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
