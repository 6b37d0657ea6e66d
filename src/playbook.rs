//! Playbook definitions and parsing.
//!
//! A playbook is a YAML list of plays; each play targets a host pattern and
//! carries an ordered task list:
//!
//! ```yaml
//! - name: web tier
//!   hosts: webservers
//!   tasks:
//!     - name: install nginx
//!       apt: { name: nginx }
//!     - name: check nginx
//!       shell: systemctl is-active nginx
//!       register: nginx_status
//!       ignore_errors: true
//!     - name: start nginx
//!       service: { name: nginx, state: started }
//!       when: nginx_status.rc != 0
//! ```
//!
//! Loading validates everything that can be checked before a run: exactly
//! one action per task, unique result keys, known `depends_on` targets and
//! that a `when` expression only reads results of tasks ordered before it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::inventory::yaml_to_json;
use crate::modules::Action;
use crate::template::{is_template, TemplateEngine};

/// `delegate_to` values that mean "run on the controller"
pub const CONTROLLER_ALIASES: &[&str] = &["localhost", "127.0.0.1", "controller"];

/// Errors raised while loading or validating a playbook
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("failed to read playbook '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("playbook contains no plays")]
    NoPlays,

    #[error("play '{play}' has no hosts pattern")]
    MissingHosts { play: String },

    #[error("task #{index} in play '{play}' has no name")]
    MissingName { play: String, index: usize },

    #[error("task name '{task}' appears more than once in play '{play}'")]
    DuplicateTaskName { play: String, task: String },

    #[error("task '{task}' does not name an action")]
    MissingAction { task: String },

    #[error("task '{task}' names more than one action: {actions:?}")]
    MultipleActions { task: String, actions: Vec<String> },

    #[error("task '{task}' has unknown key '{key}'")]
    UnknownKey { task: String, key: String },

    #[error("task '{task}' has invalid arguments: {message}")]
    InvalidArgs { task: String, message: String },

    #[error("result key '{key}' is produced by more than one task (again in play '{play}')")]
    DuplicateKey { play: String, key: String },

    #[error("task '{task}' delegates to '{target}'; only the controller is supported")]
    UnsupportedDelegation { task: String, target: String },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("task '{task}' references '{reference}', which is produced by a later task")]
    ForwardReference { task: String, reference: String },

    #[error("task '{task}' has an invalid condition: {message}")]
    InvalidCondition { task: String, message: String },
}

pub type PlaybookResult<T> = Result<T, PlaybookError>;

/// Where a task's action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionSite {
    /// The target host's own channel
    Remote,
    /// The shared controller channel
    Controller,
}

/// `when:` accepts a bool, one expression or a list (ANDed)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum When {
    Bool(bool),
    Single(String),
    Multiple(Vec<String>),
}

impl When {
    fn into_conditions(self) -> Vec<String> {
        match self {
            When::Bool(b) => vec![b.to_string()],
            When::Single(s) => vec![s],
            When::Multiple(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    when: Option<When>,
    #[serde(default)]
    run_once: bool,
    #[serde(default)]
    delegate_to: Option<String>,
    #[serde(default)]
    ignore_errors: bool,
    #[serde(default)]
    register: Option<String>,
    #[serde(default)]
    depends_on: Option<OneOrMany>,
    #[serde(default)]
    r#become: Option<bool>,
    #[serde(default)]
    become_user: Option<String>,
    #[serde(default)]
    check_mode: Option<bool>,
    #[serde(flatten)]
    rest: IndexMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawPlay {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hosts: Option<String>,
    #[serde(default)]
    vars: IndexMap<String, serde_yaml::Value>,
    #[serde(default = "default_true")]
    gather_facts: bool,
    #[serde(default)]
    r#become: bool,
    #[serde(default)]
    become_user: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

fn default_true() -> bool {
    true
}

/// A single unit of work
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub name: String,
    /// Action key as written (`apt`, `shell`, ...)
    pub action_key: String,
    /// Action arguments, not yet templated
    pub args: serde_json::Value,
    /// Conditions, all of which must hold
    pub when: Vec<String>,
    pub run_once: bool,
    pub delegate_to: Option<String>,
    pub ignore_errors: bool,
    pub register: Option<String>,
    /// Names (or register keys) of earlier tasks that must have succeeded
    pub depends_on: Vec<String>,
    pub r#become: Option<bool>,
    pub become_user: Option<String>,
    /// Per-task override of the run's check mode
    pub check_mode: Option<bool>,
}

impl Task {
    /// Create a task with defaults, mostly for tests and programmatic playbooks
    pub fn new(
        name: impl Into<String>,
        action_key: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        let action_key = action_key.into();
        let args = normalize_args(&action_key, args);
        Self {
            name: name.into(),
            action_key,
            args,
            when: Vec::new(),
            run_once: false,
            delegate_to: None,
            ignore_errors: false,
            register: None,
            depends_on: Vec::new(),
            r#become: None,
            become_user: None,
            check_mode: None,
        }
    }

    /// Key the task's result is stored under
    pub fn store_key(&self) -> &str {
        self.register.as_deref().unwrap_or(&self.name)
    }

    pub fn site(&self) -> ExecutionSite {
        let delegated = self
            .delegate_to
            .as_deref()
            .map(|target| CONTROLLER_ALIASES.contains(&target))
            .unwrap_or(false);
        if delegated || Action::forces_controller(&self.action_key) {
            ExecutionSite::Controller
        } else {
            ExecutionSite::Remote
        }
    }

    /// Build the action from (already templated) arguments
    pub fn resolve_action(&self, args: &serde_json::Value) -> PlaybookResult<Action> {
        Action::from_parts(&self.action_key, args).map_err(|e| PlaybookError::InvalidArgs {
            task: self.name.clone(),
            message: e.to_string(),
        })
    }

    fn from_raw(raw: RawTask, play: &str, index: usize) -> PlaybookResult<Self> {
        let name = raw
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PlaybookError::MissingName {
                play: play.to_string(),
                index: index + 1,
            })?;

        let mut action: Option<(String, serde_yaml::Value)> = None;
        let mut extra_actions = Vec::new();
        for (key, value) in raw.rest {
            if !Action::is_action_key(&key) {
                return Err(PlaybookError::UnknownKey { task: name, key });
            }
            if action.is_some() {
                extra_actions.push(key);
            } else {
                action = Some((key, value));
            }
        }

        let (action_key, args) = action.ok_or_else(|| PlaybookError::MissingAction {
            task: name.clone(),
        })?;
        if !extra_actions.is_empty() {
            let mut actions = vec![action_key];
            actions.extend(extra_actions);
            return Err(PlaybookError::MultipleActions {
                task: name,
                actions,
            });
        }

        let args = normalize_args(&action_key, yaml_to_json(&args));

        Ok(Self {
            name,
            action_key,
            args,
            when: raw.when.map(When::into_conditions).unwrap_or_default(),
            run_once: raw.run_once,
            delegate_to: raw.delegate_to,
            ignore_errors: raw.ignore_errors,
            register: raw.register,
            depends_on: raw.depends_on.map(OneOrMany::into_vec).unwrap_or_default(),
            r#become: raw.r#become,
            become_user: raw.become_user,
            check_mode: raw.check_mode,
        })
    }
}

/// Package aliases pin their manager; bare strings become `{name: ...}`
fn normalize_args(action_key: &str, args: serde_json::Value) -> serde_json::Value {
    let pinned = matches!(action_key, "apt" | "yum" | "dnf");
    if !pinned && action_key != "package" {
        return args;
    }

    let mut map = match args {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("name".to_string(), other);
            map
        }
    };
    if pinned && !map.contains_key("manager") {
        map.insert("manager".to_string(), serde_json::json!(action_key));
    }
    serde_json::Value::Object(map)
}

fn json_has_template(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => is_template(s),
        serde_json::Value::Array(items) => items.iter().any(json_has_template),
        serde_json::Value::Object(map) => map.values().any(json_has_template),
        _ => false,
    }
}

/// Every templated string inside a JSON value
fn collect_templates<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
    match value {
        serde_json::Value::String(s) if is_template(s) => out.push(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_templates(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_templates(v, out)),
        _ => {}
    }
}

/// Result keys a dotted path may read: its head, and the key under `results`
fn result_keys(path: &str) -> impl Iterator<Item = &str> {
    let mut parts = path.split('.');
    let head = parts.next();
    let nested = if head == Some("results") {
        parts.next()
    } else {
        None
    };
    head.into_iter().chain(nested)
}

/// A set of tasks applied to the hosts matching a pattern
#[derive(Debug, Clone, Serialize)]
pub struct Play {
    pub name: String,
    pub hosts: String,
    pub vars: serde_json::Map<String, serde_json::Value>,
    pub gather_facts: bool,
    pub r#become: bool,
    pub become_user: Option<String>,
    pub tasks: Vec<Task>,
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            vars: serde_json::Map::new(),
            gather_facts: true,
            r#become: false,
            become_user: None,
            tasks: Vec::new(),
        }
    }

    fn from_raw(raw: RawPlay, index: usize) -> PlaybookResult<Self> {
        let hosts = raw.hosts.map(|h| h.trim().to_string()).unwrap_or_default();
        let name = raw.name.unwrap_or_else(|| {
            if hosts.is_empty() {
                format!("play {}", index + 1)
            } else {
                hosts.clone()
            }
        });
        if hosts.is_empty() {
            return Err(PlaybookError::MissingHosts { play: name });
        }

        let tasks = raw
            .tasks
            .into_iter()
            .enumerate()
            .map(|(i, t)| Task::from_raw(t, &name, i))
            .collect::<PlaybookResult<Vec<_>>>()?;

        Ok(Self {
            name,
            hosts,
            vars: raw
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), yaml_to_json(v)))
                .collect(),
            gather_facts: raw.gather_facts,
            r#become: raw.r#become,
            become_user: raw.become_user,
            tasks,
        })
    }

    /// Index of the task producing `reference` (by store key or name)
    pub fn producer_of(&self, reference: &str) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.store_key() == reference || t.name == reference)
    }

    /// Check names, keys, dependencies and condition ordering
    pub fn validate(&self, predicates: &TemplateEngine) -> PlaybookResult<()> {
        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut keys: HashMap<&str, usize> = HashMap::new();

        for (index, task) in self.tasks.iter().enumerate() {
            if names.insert(task.name.as_str(), index).is_some() {
                return Err(PlaybookError::DuplicateTaskName {
                    play: self.name.clone(),
                    task: task.name.clone(),
                });
            }
            if keys.insert(task.store_key(), index).is_some() {
                return Err(PlaybookError::DuplicateKey {
                    play: self.name.clone(),
                    key: task.store_key().to_string(),
                });
            }
        }

        let lookup = |reference: &str| keys.get(reference).or_else(|| names.get(reference)).copied();

        for (index, task) in self.tasks.iter().enumerate() {
            if let Some(target) = &task.delegate_to {
                if !CONTROLLER_ALIASES.contains(&target.as_str()) {
                    return Err(PlaybookError::UnsupportedDelegation {
                        task: task.name.clone(),
                        target: target.clone(),
                    });
                }
            }

            if let Err(e) = task.resolve_action(&task.args) {
                if !json_has_template(&task.args) {
                    return Err(e);
                }
            }

            for dependency in &task.depends_on {
                match lookup(dependency) {
                    None => {
                        return Err(PlaybookError::UnknownDependency {
                            task: task.name.clone(),
                            dependency: dependency.clone(),
                        })
                    }
                    Some(producer) if producer >= index => {
                        return Err(PlaybookError::ForwardReference {
                            task: task.name.clone(),
                            reference: dependency.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            let mut referenced = Vec::new();
            for condition in &task.when {
                let paths = predicates.referenced_paths(condition).map_err(|e| {
                    PlaybookError::InvalidCondition {
                        task: task.name.clone(),
                        message: e.to_string(),
                    }
                })?;
                referenced.extend(paths);
            }

            let mut sources = Vec::new();
            collect_templates(&task.args, &mut sources);
            for source in sources {
                let paths = predicates.template_paths(&task.name, source).map_err(|e| {
                    PlaybookError::InvalidArgs {
                        task: task.name.clone(),
                        message: e.to_string(),
                    }
                })?;
                referenced.extend(paths);
            }

            referenced.sort();
            for path in &referenced {
                for key in result_keys(path) {
                    if let Some(producer) = keys.get(key).copied() {
                        if producer >= index {
                            return Err(PlaybookError::ForwardReference {
                                task: task.name.clone(),
                                reference: key.to_string(),
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// A playbook containing one or more plays
#[derive(Debug, Clone, Serialize)]
pub struct Playbook {
    pub plays: Vec<Play>,
    /// Path to the playbook file (set during loading)
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Playbook {
    /// Load and validate a playbook file
    pub fn load<P: AsRef<Path>>(path: P) -> PlaybookResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PlaybookError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut playbook = Self::from_yaml_str(&content)?;
        playbook.source_path = Some(path.to_path_buf());
        debug!(
            source = %path.display(),
            plays = playbook.plays.len(),
            tasks = playbook.task_count(),
            "Loaded playbook"
        );
        Ok(playbook)
    }

    /// Parse and validate playbook YAML
    pub fn from_yaml_str(content: &str) -> PlaybookResult<Self> {
        let raw: Vec<RawPlay> = serde_yaml::from_str(content)?;
        let plays = raw
            .into_iter()
            .enumerate()
            .map(|(i, p)| Play::from_raw(p, i))
            .collect::<PlaybookResult<Vec<_>>>()?;

        let playbook = Self {
            plays,
            source_path: None,
        };
        playbook.validate()?;
        Ok(playbook)
    }

    pub fn from_plays(plays: Vec<Play>) -> PlaybookResult<Self> {
        let playbook = Self {
            plays,
            source_path: None,
        };
        playbook.validate()?;
        Ok(playbook)
    }

    pub fn validate(&self) -> PlaybookResult<()> {
        if self.plays.is_empty() {
            return Err(PlaybookError::NoPlays);
        }
        let predicates = TemplateEngine::predicate();
        // The store is write-once per host for the whole run
        let mut keys: HashSet<&str> = HashSet::new();
        for play in &self.plays {
            play.validate(&predicates)?;
            for task in &play.tasks {
                if !keys.insert(task.store_key()) {
                    return Err(PlaybookError::DuplicateKey {
                        play: play.name.clone(),
                        key: task.store_key().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Directory controller-side relative paths resolve against
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn task_count(&self) -> usize {
        self.plays.iter().map(|p| p.tasks.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NGINX: &str = r#"
- name: web tier
  hosts: webservers
  vars:
    http_port: 8080
  tasks:
    - name: install nginx
      apt: nginx
    - name: check nginx
      shell: systemctl is-active nginx
      register: nginx_status
      ignore_errors: true
    - name: start nginx
      service:
        name: nginx
        state: started
      when: nginx_status.rc != 0
    - name: fetch bundle
      download:
        url: https://example.com/bundle.tgz
        dest: /tmp/bundle.tgz
      run_once: true
      delegate_to: localhost
    - name: ship bundle
      copy:
        src: /tmp/bundle.tgz
        dest: /opt/bundle.tgz
      depends_on: fetch bundle
    - name: report
      report:
        template: summary.j2
        kind: summary
"#;

    #[test]
    fn test_parse_tasks() {
        let playbook = Playbook::from_yaml_str(NGINX).unwrap();
        let play = &playbook.plays[0];

        assert_eq!(play.hosts, "webservers");
        assert!(play.gather_facts);
        assert_eq!(play.vars["http_port"], serde_json::json!(8080));
        assert_eq!(play.tasks.len(), 6);

        let install = &play.tasks[0];
        assert_eq!(
            install.args,
            serde_json::json!({"name": "nginx", "manager": "apt"})
        );
        assert_eq!(install.store_key(), "install nginx");

        let check = &play.tasks[1];
        assert_eq!(check.store_key(), "nginx_status");
        assert!(check.ignore_errors);

        assert_eq!(play.tasks[2].when, vec!["nginx_status.rc != 0"]);

        let fetch = &play.tasks[3];
        assert!(fetch.run_once);
        assert_eq!(fetch.site(), ExecutionSite::Controller);

        assert_eq!(play.tasks[4].depends_on, vec!["fetch bundle"]);
        assert_eq!(play.tasks[4].site(), ExecutionSite::Remote);
        assert_eq!(play.tasks[5].site(), ExecutionSite::Controller);
    }

    #[test]
    fn test_forward_reference_in_condition_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: start
      shell: echo start
      when: probe.rc == 0
    - name: probe
      shell: "true"
      register: probe
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlaybookError::ForwardReference { ref task, ref reference } if task == "start" && reference == "probe"
        ));
    }

    #[test]
    fn test_self_reference_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: loop
      shell: "true"
      register: me
      when: me.rc == 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybookError::ForwardReference { .. }));
    }

    #[test]
    fn test_facts_and_vars_in_conditions_allowed() {
        Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: debian only
      debug: hi
      when:
        - os_family == 'Debian'
        - http_port > 80
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: first
      shell: "true"
      depends_on: second
    - name: second
      shell: "true"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybookError::ForwardReference { .. }));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: first
      shell: "true"
      depends_on: [ghost]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybookError::UnknownDependency { .. }));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: a
      shell: "true"
      register: out
    - name: b
      shell: "true"
      register: out
"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlaybookError::DuplicateKey { ref key, .. } if key == "out"));
    }

    #[test]
    fn test_duplicate_keys_across_plays_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- name: first
  hosts: all
  tasks:
    - name: version
      shell: echo first
      register: version
- name: second
  hosts: all
  tasks:
    - name: version again
      shell: echo second
      register: version
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlaybookError::DuplicateKey { ref key, ref play } if key == "version" && play == "second"
        ));
    }

    #[test]
    fn test_earlier_play_results_may_be_read() {
        Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: version
      shell: nginx -v
      register: version
- hosts: all
  tasks:
    - name: show
      debug: "{{ version.stdout }}"
      when: results.version.rc == 0
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_forward_reference_through_results_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: early
      debug: early
      when: results.version.rc == 0
    - name: version
      shell: nginx -v
      register: version
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlaybookError::ForwardReference { ref task, ref reference } if task == "early" && reference == "version"
        ));
    }

    #[test]
    fn test_forward_reference_in_arguments_rejected() {
        let err = Playbook::from_yaml_str(
            r#"
- hosts: all
  tasks:
    - name: announce
      debug: "version {{ version.stdout }}"
    - name: version
      shell: nginx -v
      register: version
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlaybookError::ForwardReference { ref task, ref reference } if task == "announce" && reference == "version"
        ));
    }

    #[test]
    fn test_task_shape_errors() {
        let missing = Playbook::from_yaml_str("- hosts: all\n  tasks:\n    - name: x\n").unwrap_err();
        assert!(matches!(missing, PlaybookError::MissingAction { .. }));

        let multiple = Playbook::from_yaml_str(
            "- hosts: all\n  tasks:\n    - name: x\n      shell: a\n      debug: b\n",
        )
        .unwrap_err();
        assert!(matches!(multiple, PlaybookError::MultipleActions { .. }));

        let unknown = Playbook::from_yaml_str(
            "- hosts: all\n  tasks:\n    - name: x\n      shell: a\n      notify: h\n",
        )
        .unwrap_err();
        assert!(matches!(unknown, PlaybookError::UnknownKey { ref key, .. } if key == "notify"));

        let unnamed =
            Playbook::from_yaml_str("- hosts: all\n  tasks:\n    - shell: a\n").unwrap_err();
        assert!(matches!(unnamed, PlaybookError::MissingName { index: 1, .. }));
    }

    #[test]
    fn test_delegation_to_other_host_rejected() {
        let err = Playbook::from_yaml_str(
            "- hosts: all\n  tasks:\n    - name: x\n      shell: a\n      delegate_to: db1\n",
        )
        .unwrap_err();
        assert!(matches!(err, PlaybookError::UnsupportedDelegation { .. }));
    }

    #[test]
    fn test_invalid_args_rejected_unless_templated() {
        let err = Playbook::from_yaml_str(
            "- hosts: all\n  tasks:\n    - name: x\n      service: { state: started }\n",
        )
        .unwrap_err();
        assert!(matches!(err, PlaybookError::InvalidArgs { .. }));

        Playbook::from_yaml_str(
            "- hosts: all\n  tasks:\n    - name: x\n      service: { name: nginx, enabled: \"{{ enable_it }}\" }\n",
        )
        .unwrap();
    }

    #[test]
    fn test_base_dir() {
        let mut playbook = Playbook::from_yaml_str("- hosts: all\n  tasks: []\n").unwrap();
        assert_eq!(playbook.base_dir(), PathBuf::from("."));
        playbook.source_path = Some(PathBuf::from("/srv/site/deploy.yml"));
        assert_eq!(playbook.base_dir(), PathBuf::from("/srv/site"));
    }
}
