//! Core execution engine for provisor
//!
//! This module provides the task executor:
//! - One sequential task list per host, hosts in parallel up to `forks`
//! - Run-once tasks executed by the first host to reach them
//! - Controller-delegated tasks serialized on the shared local channel
//! - Dependency-aware skipping once a host fails
//! - A run-level deadline that skips whatever has not started

pub mod condition;
pub mod run_once;
pub mod store;
pub mod task;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::callback::ExecutionCallback;
use crate::connection::{open_with_retry, Connection, ConnectionProvider, RetryConfig};
use crate::error::{Error, Result};
use crate::facts::{FactCache, Facts};
use crate::inventory::{Host, Inventory};
use crate::modules::{ActionError, ModuleContext, ModuleOutput, OutcomeKind};
use crate::playbook::{ExecutionSite, Play, Playbook, Task};
use crate::report::ReportRenderer;
use crate::template::TemplateEngine;

use self::condition::ConditionEvaluator;
use self::run_once::{RunOnceOutcome, RunOnceRegistry, RunOnceResult};
use self::store::{ResultStore, StoreError};
use self::task::{SkipReason, TaskRecord, TaskState};

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of hosts executing concurrently
    pub forks: usize,
    /// Dry run: read-only queries only
    pub check_mode: bool,
    /// Per-command timeout in seconds
    pub command_timeout: Option<u64>,
    /// Deadline for the whole run
    pub run_timeout: Option<Duration>,
    pub retry: RetryConfig,
    pub reports_dir: PathBuf,
    /// Stamp used in report names, `%Y%m%dT%H%M%S%3fZ`
    pub run_timestamp: String,
    /// Variables that override inventory and play vars
    pub extra_vars: Map<String, JsonValue>,
    /// Additional host pattern every play is intersected with
    pub limit: Option<String>,
    /// Directory controller-side relative paths resolve against
    pub base_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            forks: 5,
            check_mode: false,
            command_timeout: None,
            run_timeout: None,
            retry: RetryConfig::default(),
            reports_dir: PathBuf::from("reports"),
            run_timestamp: new_run_timestamp(),
            extra_vars: Map::new(),
            limit: None,
            base_dir: PathBuf::from("."),
        }
    }
}

/// Current UTC time formatted for report names
pub fn new_run_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// Final status of a host's sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostStatus {
    Succeeded,
    Failed { task: String, reason: String },
}

/// Everything that happened on one host
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub host: String,
    pub status: HostStatus,
    pub records: Vec<TaskRecord>,
}

impl HostSummary {
    fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: HostStatus::Succeeded,
            records: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, HostStatus::Failed { .. })
    }

    /// Record the first failure; later ones do not replace it
    fn fail(&mut self, task: &str, reason: impl Into<String>) {
        if !self.is_failed() {
            self.status = HostStatus::Failed {
                task: task.to_string(),
                reason: reason.into(),
            };
        }
    }

    pub fn skipped_tasks(&self) -> Vec<&TaskRecord> {
        self.records.iter().filter(|r| r.is_skipped()).collect()
    }

    pub fn changed_count(&self) -> usize {
        self.records.iter().filter(|r| r.changed).count()
    }

    /// `Succeeded` or `Failed: <task>, <reason>`
    pub fn status_line(&self) -> String {
        match &self.status {
            HostStatus::Succeeded => "Succeeded".to_string(),
            HostStatus::Failed { task, reason } => format!("Failed: {}, {}", task, reason),
        }
    }

    /// `Skipped tasks: [...]`, if anything was skipped
    pub fn skipped_line(&self) -> Option<String> {
        let skipped = self.skipped_tasks();
        if skipped.is_empty() {
            return None;
        }
        let entries: Vec<String> = skipped
            .iter()
            .map(|r| match r.skip_reason() {
                Some(reason) => format!("{} ({})", r.task, reason),
                None => r.task.clone(),
            })
            .collect();
        Some(format!("Skipped tasks: [{}]", entries.join(", ")))
    }

    fn merge(&mut self, other: HostSummary) {
        if let HostStatus::Failed { task, reason } = other.status {
            self.fail(&task, reason);
        }
        self.records.extend(other.records);
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_timestamp: String,
    pub hosts: IndexMap<String, HostSummary>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.hosts.values().all(|h| !h.is_failed())
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .values()
            .filter(|h| h.is_failed())
            .map(|h| h.host.as_str())
            .collect()
    }

    /// 0 on full success, 2 if any host failed
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            2
        }
    }
}

struct Shared {
    config: ExecutorConfig,
    provider: Arc<dyn ConnectionProvider>,
    store: ResultStore,
    facts: FactCache,
    run_once: RunOnceRegistry,
    /// Serializes controller-delegated actions
    controller_lock: Mutex<()>,
    reports: ReportRenderer,
    templates: TemplateEngine,
    conditions: ConditionEvaluator,
    semaphore: Arc<Semaphore>,
    callback: RwLock<Option<Arc<dyn ExecutionCallback>>>,
}

/// Per-host, per-play inputs handed to a worker
struct HostJob {
    play: Arc<Play>,
    play_index: usize,
    host: Host,
    vars: Map<String, JsonValue>,
    deadline: Option<Instant>,
}

/// The main executor engine
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(config: ExecutorConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        let forks = config.forks.max(1);
        let reports = ReportRenderer::new(config.reports_dir.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                provider,
                store: ResultStore::new(),
                facts: FactCache::new(),
                run_once: RunOnceRegistry::new(),
                controller_lock: Mutex::new(()),
                reports,
                templates: TemplateEngine::strict(),
                conditions: ConditionEvaluator::new(),
                semaphore: Arc::new(Semaphore::new(forks)),
                callback: RwLock::new(None),
            }),
        }
    }

    pub fn with_callback(self, callback: Arc<dyn ExecutionCallback>) -> Self {
        *self.shared.callback.write() = Some(callback);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Results recorded by the last run
    pub fn store(&self) -> &ResultStore {
        &self.shared.store
    }

    /// Run every play of a playbook against the inventory
    #[instrument(skip_all, fields(run = %self.shared.config.run_timestamp))]
    pub async fn run(&self, playbook: &Playbook, inventory: &Inventory) -> Result<RunSummary> {
        let shared = &self.shared;
        shared.store.clear();
        shared.facts.clear();
        shared.run_once.clear();

        let deadline = shared.config.run_timeout.map(|t| Instant::now() + t);
        let limit: Option<HashSet<String>> = match &shared.config.limit {
            Some(pattern) => Some(
                inventory
                    .get_hosts_for_pattern(pattern)?
                    .into_iter()
                    .map(|h| h.name.clone())
                    .collect(),
            ),
            None => None,
        };

        let mut summaries: IndexMap<String, HostSummary> = IndexMap::new();
        let mut matched_any = false;

        for (play_index, play) in playbook.plays.iter().enumerate() {
            let hosts: Vec<Host> = inventory
                .get_hosts_for_pattern(&play.hosts)?
                .into_iter()
                .filter(|h| limit.as_ref().map_or(true, |l| l.contains(&h.name)))
                .filter(|h| summaries.get(&h.name).map_or(true, |s| !s.is_failed()))
                .cloned()
                .collect();

            if hosts.is_empty() {
                warn!(play = %play.name, pattern = %play.hosts, "No hosts matched, skipping play");
                continue;
            }
            matched_any = true;

            let names: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();
            info!(play = %play.name, hosts = names.len(), "Starting play");
            if let Some(cb) = shared.callback.read().clone() {
                cb.on_play_start(&play.name, &names);
            }

            let play = Arc::new(play.clone());
            let mut workers = Vec::with_capacity(hosts.len());
            for host in hosts {
                let mut vars = inventory.host_vars_json(&host);
                for (k, v) in &play.vars {
                    vars.insert(k.clone(), v.clone());
                }
                for (k, v) in &shared.config.extra_vars {
                    vars.insert(k.clone(), v.clone());
                }
                vars.insert(
                    "run_timestamp".to_string(),
                    JsonValue::String(shared.config.run_timestamp.clone()),
                );

                let job = HostJob {
                    play: play.clone(),
                    play_index,
                    host,
                    vars,
                    deadline,
                };
                let name = job.host.name.clone();
                let shared = shared.clone();
                workers.push((name, tokio::spawn(run_host(shared, job))));
            }

            let (names, handles): (Vec<String>, Vec<_>) = workers.into_iter().unzip();
            let joined = futures::future::join_all(handles).await;

            for (name, outcome) in names.into_iter().zip(joined) {
                let summary = match outcome {
                    Ok(summary) => summary,
                    Err(e) => {
                        error!(host = %name, error = %e, "Host worker panicked");
                        let mut summary = HostSummary::new(&name);
                        summary.fail("worker", e.to_string());
                        summary
                    }
                };
                match summaries.get_mut(&name) {
                    Some(existing) => existing.merge(summary),
                    None => {
                        summaries.insert(name, summary);
                    }
                }
            }
        }

        if !matched_any {
            return Err(Error::NoHostsMatched(
                shared
                    .config
                    .limit
                    .clone()
                    .unwrap_or_else(|| playbook.plays.iter().map(|p| p.hosts.as_str()).collect::<Vec<_>>().join(", ")),
            ));
        }

        let summary = RunSummary {
            run_timestamp: shared.config.run_timestamp.clone(),
            hosts: summaries,
        };
        info!(
            hosts = summary.hosts.len(),
            failed = summary.failed_hosts().len(),
            "Run complete"
        );
        Ok(summary)
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}

fn notify_task(shared: &Shared, host: &str, record: &TaskRecord) {
    if let Some(cb) = shared.callback.read().clone() {
        cb.on_task_complete(host, record);
    }
}

/// Mark every task as skipped for `reason` without attempting any of them
fn skip_all(shared: &Shared, summary: &mut HostSummary, tasks: &[Task], reason: SkipReason) {
    for task in tasks {
        let mut record = TaskRecord::new(&task.name, task.store_key());
        advance(&mut record, TaskState::Skipped(reason));
        notify_task(shared, &summary.host, &record);
        summary.records.push(record);
    }
}

fn finish(shared: &Shared, summary: HostSummary) -> HostSummary {
    match &summary.status {
        HostStatus::Succeeded => info!(host = %summary.host, "Host succeeded"),
        HostStatus::Failed { task, reason } => {
            warn!(host = %summary.host, task = %task, reason = %reason, "Host failed")
        }
    }
    if let Some(cb) = shared.callback.read().clone() {
        cb.on_host_complete(&summary);
    }
    summary
}

async fn run_host(shared: Arc<Shared>, job: HostJob) -> HostSummary {
    let HostJob {
        play,
        play_index,
        host,
        vars,
        deadline,
    } = job;
    let mut summary = HostSummary::new(&host.name);

    let permit = match deadline {
        Some(d) => tokio::time::timeout_at(d, shared.semaphore.clone().acquire_owned())
            .await
            .ok()
            .and_then(|p| p.ok()),
        None => shared.semaphore.clone().acquire_owned().await.ok(),
    };
    if permit.is_none() || past(deadline) {
        let first = play.tasks.first().map(|t| t.name.as_str()).unwrap_or("start");
        summary.fail(first, "run timeout");
        skip_all(&shared, &mut summary, &play.tasks, SkipReason::RunTimeout);
        return finish(&shared, summary);
    }

    let connection = match open_with_retry(shared.provider.as_ref(), &host, &shared.config.retry).await
    {
        Ok(conn) => conn,
        Err(e) => {
            error!(host = %host.name, error = %e, "Connection failed");
            summary.fail("connection", e.to_string());
            skip_all(&shared, &mut summary, &play.tasks, SkipReason::HostFailed);
            return finish(&shared, summary);
        }
    };

    let facts = if play.gather_facts {
        shared.facts.get_or_gather(&host.name, connection.as_ref()).await
    } else {
        Arc::new(Facts::default())
    };

    let mut runner = HostRunner {
        shared: &shared,
        play: &play,
        play_index,
        host: &host,
        vars: &vars,
        facts: &facts,
        connection: connection.as_ref(),
        blocked: HashSet::new(),
        halted: false,
    };

    for (index, task) in play.tasks.iter().enumerate() {
        let record = runner.run_task(index, task, deadline, &mut summary).await;
        notify_task(&shared, &host.name, &record);
        summary.records.push(record);
    }

    if let Err(e) = connection.close().await {
        debug!(host = %host.name, error = %e, "Error closing connection");
    }
    drop(permit);

    finish(&shared, summary)
}

/// Sequential task runner for one host within one play
struct HostRunner<'a> {
    shared: &'a Shared,
    play: &'a Play,
    play_index: usize,
    host: &'a Host,
    vars: &'a Map<String, JsonValue>,
    facts: &'a Facts,
    connection: &'a dyn Connection,
    /// Indices of tasks that failed or were skipped for a failed dependency
    blocked: HashSet<usize>,
    halted: bool,
}

impl<'a> HostRunner<'a> {
    fn dependency_failed(&self, task: &Task) -> bool {
        task.depends_on
            .iter()
            .filter_map(|d| self.play.producer_of(d))
            .any(|i| self.blocked.contains(&i))
    }

    async fn run_task(
        &mut self,
        index: usize,
        task: &Task,
        deadline: Option<Instant>,
        summary: &mut HostSummary,
    ) -> TaskRecord {
        let host = self.host.name.as_str();
        let key = task.store_key();
        let mut record = TaskRecord::new(&task.name, key);

        if past(deadline) {
            advance(&mut record, TaskState::Skipped(SkipReason::RunTimeout));
            summary.fail(&task.name, "run timeout");
            return record;
        }
        if self.dependency_failed(task) {
            self.blocked.insert(index);
            advance(&mut record, TaskState::Skipped(SkipReason::DependencyFailed));
            info!(host = %host, task = %task.name, "Skipped: dependency failed");
            return record;
        }
        if self.halted {
            advance(&mut record, TaskState::Skipped(SkipReason::HostFailed));
            return record;
        }

        advance(&mut record, TaskState::Evaluating);
        let snapshot = self.shared.store.snapshot(host, self.vars, self.facts);

        match self.shared.conditions.evaluate_all(&task.when, &snapshot) {
            Ok(true) => {}
            Ok(false) => {
                advance(&mut record, TaskState::Skipped(SkipReason::ConditionFalse));
                debug!(host = %host, task = %task.name, "Condition false, skipping");
                return record;
            }
            Err(e) => {
                advance(&mut record, TaskState::Failed(e.to_string()));
                record.halts = true;
                record.msg = Some(e.to_string());
                self.absorb_failure(index, task, &mut record, summary);
                return record;
            }
        }

        let mut record = if task.run_once {
            self.run_once(task, record, &snapshot).await
        } else if self.shared.store.contains(host, key) {
            let e = StoreError::KeyExists {
                host: host.to_string(),
                key: key.to_string(),
            };
            error!(host = %host, task = %task.name, error = %e, "Result key already recorded");
            advance(&mut record, TaskState::Failed(e.to_string()));
            record.halts = true;
            record.msg = Some(e.to_string());
            record
        } else {
            let mut record = self.execute(task, record, &snapshot).await;
            if let Some(result) = record.result.clone() {
                if let Err(e) = self.shared.store.put(host, key, result) {
                    refuse_result(&mut record, host, e);
                }
            }
            record
        };

        info!(host = %host, task = %task.name, state = %record.state, "Task complete");
        if record.is_failed() {
            self.absorb_failure(index, task, &mut record, summary);
        }
        record
    }

    fn absorb_failure(
        &mut self,
        index: usize,
        task: &Task,
        record: &mut TaskRecord,
        summary: &mut HostSummary,
    ) {
        self.blocked.insert(index);
        if task.ignore_errors {
            record.ignored = true;
            record.halts = false;
            info!(host = %self.host.name, task = %task.name, "Failure ignored");
            return;
        }
        let reason = record.failure_reason().unwrap_or("failed").to_string();
        summary.fail(&task.name, reason);
        if record.halts {
            self.halted = true;
        }
    }

    async fn run_once(&self, task: &Task, record: TaskRecord, snapshot: &JsonValue) -> TaskRecord {
        let host = self.host.name.clone();
        let cell_key = format!("{}:{}", self.play_index, task.store_key());
        let shared = self.shared;

        let result = shared
            .run_once
            .run(&cell_key, || async {
                let mut executed = self.execute(task, record.clone(), snapshot).await;
                if let Some(result) = executed.result.clone() {
                    if let Err(e) = shared.store.publish(task.store_key(), result) {
                        refuse_result(&mut executed, &host, e);
                    }
                }
                RunOnceOutcome {
                    host: host.clone(),
                    record: executed,
                }
            })
            .await;

        match result {
            RunOnceResult::Executed(outcome) => outcome.record,
            RunOnceResult::Published(outcome) => {
                let mut record = record;
                match outcome.record.failure_reason() {
                    Some(reason) => {
                        advance(
                            &mut record,
                            TaskState::Failed(format!(
                                "run-once task failed on {}: {}",
                                outcome.host, reason
                            )),
                        );
                        record.halts = true;
                        record.msg = outcome.record.msg.clone();
                    }
                    None => {
                        advance(&mut record, TaskState::Skipped(SkipReason::RunOnceDone));
                        record.msg = Some(format!("ran on {}", outcome.host));
                    }
                }
                record.result = outcome.record.result.clone();
                record
            }
        }
    }

    /// Template the arguments and run the action on the right channel
    async fn execute(&self, task: &Task, mut record: TaskRecord, snapshot: &JsonValue) -> TaskRecord {
        let shared = self.shared;
        advance(&mut record, TaskState::Running);

        let r#become = task
            .r#become
            .unwrap_or(self.play.r#become || self.host.r#become);
        let become_user = task
            .become_user
            .as_deref()
            .or(self.play.become_user.as_deref())
            .or(self.host.become_user.as_deref());

        let controller = shared.provider.controller();
        let on_controller = task.site() == ExecutionSite::Controller;
        let connection: &dyn Connection = if on_controller {
            controller.as_ref()
        } else {
            self.connection
        };

        let outcome: std::result::Result<ModuleOutput, ActionError> = async {
            let args = shared
                .templates
                .render_value(&task.name, &task.args, snapshot)?;
            let action = task
                .resolve_action(&args)
                .map_err(|e| ActionError::InvalidArgs(e.to_string()))?;

            let check_mode = match task.check_mode {
                Some(false) if shared.config.check_mode && !action.may_skip_check_mode() => {
                    warn!(
                        host = %self.host.name,
                        task = %task.name,
                        action = action.kind(),
                        "check_mode: false only applies to shell tasks, staying in check mode"
                    );
                    true
                }
                Some(explicit) => explicit,
                None => shared.config.check_mode,
            };

            let ctx = ModuleContext {
                host: &self.host.name,
                connection,
                on_controller,
                check_mode,
                r#become,
                become_user,
                facts: self.facts,
                context: snapshot,
                templates: &shared.templates,
                reports: &shared.reports,
                run_timestamp: &shared.config.run_timestamp,
                command_timeout: shared.config.command_timeout,
                base_dir: &shared.config.base_dir,
            };

            debug!(
                host = %self.host.name,
                task = %task.name,
                action = action.kind(),
                site = ?task.site(),
                "Executing action"
            );
            if on_controller {
                let _guard = shared.controller_lock.lock().await;
                action.execute(&ctx).await
            } else {
                action.execute(&ctx).await
            }
        }
        .await;

        match outcome {
            Ok(output) => apply_output(&mut record, output),
            Err(e) => {
                // Report failures only fail the report itself
                record.halts =
                    !(matches!(e, ActionError::Report(_)) || task.action_key == "report");
                let msg = e.to_string();
                advance(&mut record, TaskState::Failed(msg.clone()));
                record.result = Some(result_json(&record, None));
                record.msg = Some(msg);
                if record.halts {
                    error!(host = %self.host.name, task = %task.name, error = %e, "Task failed");
                } else {
                    warn!(host = %self.host.name, task = %task.name, error = %e, "Report failed");
                }
            }
        }
        record
    }
}

/// Move a record to `next`; an illegal transition is logged and leaves the
/// state unchanged
fn advance(record: &mut TaskRecord, next: TaskState) {
    if let Err(e) = record.state.transition(next) {
        error!(task = %record.task, error = %e, "Illegal task state transition");
    }
}

/// The store refused a result, so the task cannot count as done
fn refuse_result(record: &mut TaskRecord, host: &str, e: StoreError) {
    error!(host = %host, task = %record.task, error = %e, "Result not stored");
    record.state = TaskState::Failed(e.to_string());
    record.halts = true;
    record.msg = Some(e.to_string());
}

fn apply_output(record: &mut TaskRecord, output: ModuleOutput) {
    let next = match output.kind {
        OutcomeKind::Changed | OutcomeKind::Ok => TaskState::Succeeded,
        OutcomeKind::AlreadySatisfied => TaskState::Skipped(SkipReason::AlreadySatisfied),
        OutcomeKind::WouldChange => TaskState::Skipped(SkipReason::CheckMode),
        OutcomeKind::Failed => {
            record.halts = true;
            TaskState::Failed(output.msg.clone())
        }
    };
    advance(record, next);
    record.changed = output.changed_anything();
    record.msg = Some(output.msg.clone()).filter(|m| !m.is_empty());
    record.result = Some(result_json(record, Some(&output)));
}

/// Stored result for a task
fn result_json(record: &TaskRecord, output: Option<&ModuleOutput>) -> JsonValue {
    let mut map = Map::new();
    map.insert("status".into(), json!(record.state.label()));
    map.insert("changed".into(), json!(record.changed));
    map.insert("failed".into(), json!(record.is_failed()));
    map.insert("skipped".into(), json!(record.is_skipped()));
    map.insert(
        "skip_reason".into(),
        json!(record.skip_reason().map(|r| r.to_string())),
    );

    let msg = match output {
        Some(o) => o.msg.clone(),
        None => record.failure_reason().unwrap_or_default().to_string(),
    };
    map.insert("msg".into(), json!(msg));
    map.insert("rc".into(), json!(output.and_then(|o| o.rc)));

    let stdout = output.and_then(|o| o.stdout.clone());
    map.insert(
        "stdout_lines".into(),
        json!(stdout
            .as_deref()
            .map(|s| s.lines().collect::<Vec<_>>())
            .unwrap_or_default()),
    );
    map.insert("stdout".into(), json!(stdout.unwrap_or_default()));
    map.insert(
        "stderr".into(),
        json!(output.and_then(|o| o.stderr.clone()).unwrap_or_default()),
    );
    map.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));

    if let Some(output) = output {
        for (k, v) in &output.data {
            map.insert(k.clone(), v.clone());
        }
    }
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task: &str, state: TaskState) -> TaskRecord {
        let mut r = TaskRecord::new(task, task);
        r.state = state;
        r
    }

    #[test]
    fn test_status_lines() {
        let mut summary = HostSummary::new("web1");
        summary
            .records
            .push(record("install nginx", TaskState::Skipped(SkipReason::AlreadySatisfied)));
        summary.records.push(record("start nginx", TaskState::Succeeded));
        assert_eq!(summary.status_line(), "Succeeded");
        assert_eq!(
            summary.skipped_line().unwrap(),
            "Skipped tasks: [install nginx (already satisfied)]"
        );

        summary.fail("start nginx", "exit code 1");
        summary.fail("later", "ignored");
        assert_eq!(summary.status_line(), "Failed: start nginx, exit code 1");
    }

    #[test]
    fn test_exit_code() {
        let mut hosts = IndexMap::new();
        hosts.insert("a".to_string(), HostSummary::new("a"));
        let mut run = RunSummary {
            run_timestamp: "ts".into(),
            hosts,
        };
        assert_eq!(run.exit_code(), 0);

        let mut failed = HostSummary::new("b");
        failed.fail("t", "boom");
        run.hosts.insert("b".into(), failed);
        assert_eq!(run.exit_code(), 2);
        assert_eq!(run.failed_hosts(), vec!["b"]);
    }

    #[test]
    fn test_run_timestamps_have_millisecond_resolution() {
        let first = new_run_timestamp();
        std::thread::sleep(Duration::from_millis(5));
        let second = new_run_timestamp();

        assert_eq!(first.len(), "20240101T000000123Z".len());
        assert!(first.ends_with('Z'));
        assert_ne!(first, second);
    }

    #[test]
    fn test_illegal_transition_keeps_state() {
        let mut r = TaskRecord::new("t", "t");
        advance(&mut r, TaskState::Evaluating);
        advance(&mut r, TaskState::Running);
        advance(&mut r, TaskState::Succeeded);
        assert_eq!(r.state, TaskState::Succeeded);

        advance(&mut r, TaskState::Running);
        assert_eq!(r.state, TaskState::Succeeded);
    }

    #[test]
    fn test_refused_result_fails_the_task() {
        let mut r = TaskRecord::new("version", "version");
        r.state = TaskState::Succeeded;
        refuse_result(
            &mut r,
            "web1",
            StoreError::KeyExists {
                host: "web1".into(),
                key: "version".into(),
            },
        );
        assert!(r.is_failed());
        assert!(r.halts);
        assert_eq!(
            r.failure_reason(),
            Some("result key 'version' already recorded for host 'web1'")
        );
    }

    #[test]
    fn test_apply_output_maps_kinds() {
        let mut r = TaskRecord::new("t", "t");
        r.state = TaskState::Running;
        apply_output(&mut r, ModuleOutput::satisfied("nginx already installed"));
        assert_eq!(r.state, TaskState::Skipped(SkipReason::AlreadySatisfied));
        let result = r.result.unwrap();
        assert_eq!(result["skipped"], json!(true));
        assert_eq!(result["skip_reason"], json!("already satisfied"));

        let mut r = TaskRecord::new("t", "t");
        r.state = TaskState::Running;
        apply_output(&mut r, ModuleOutput::failed("boom"));
        assert!(r.halts);
        assert_eq!(r.result.unwrap()["failed"], json!(true));
    }
}
