//! Per-task execution state
//!
//! Each task on each host moves through
//! `Pending -> Evaluating -> {Skipped, Running -> {Succeeded, Failed, Skipped}}`.
//! `Running -> Skipped` is only legal for idempotence and check-mode skips,
//! the two cases where the action itself decides nothing needs doing.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a task did not run (or ran without effect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `when` evaluated false
    ConditionFalse,
    /// Another host already ran this run-once task
    RunOnceDone,
    /// Current state already matched the request
    AlreadySatisfied,
    /// Check mode suppressed a mutating step
    CheckMode,
    /// A task listed in `depends_on` failed
    DependencyFailed,
    /// An earlier task failed and halted the host
    HostFailed,
    /// The run deadline passed before the task was scheduled
    RunTimeout,
}

impl SkipReason {
    /// Skips that stem from a failure elsewhere rather than from state
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            SkipReason::DependencyFailed | SkipReason::HostFailed | SkipReason::RunTimeout
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::ConditionFalse => "condition false",
            SkipReason::RunOnceDone => "run once",
            SkipReason::AlreadySatisfied => "already satisfied",
            SkipReason::CheckMode => "check mode",
            SkipReason::DependencyFailed => "dependency failed",
            SkipReason::HostFailed => "host failed",
            SkipReason::RunTimeout => "run timeout",
        };
        write!(f, "{}", s)
    }
}

/// State of one task on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Evaluating,
    Running,
    Skipped(SkipReason),
    Succeeded,
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal task transition from {from} to {to}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Skipped(_) | TaskState::Succeeded | TaskState::Failed(_)
        )
    }

    fn allows(&self, next: &TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Evaluating) => true,
            // Blocked before evaluation: host failed, dependency failed, timeout
            (Pending, Skipped(reason)) => reason.is_blocking(),
            (Evaluating, Skipped(_)) | (Evaluating, Running) => true,
            // Run-once results propagated from another host
            (Evaluating, Failed(_)) => true,
            (Running, Succeeded) | (Running, Failed(_)) => true,
            (Running, Skipped(SkipReason::AlreadySatisfied | SkipReason::CheckMode)) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: TaskState) -> Result<(), TransitionError> {
        if self.allows(&next) {
            *self = next;
            Ok(())
        } else {
            Err(TransitionError {
                from: self.clone(),
                to: next,
            })
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Evaluating => "evaluating",
            TaskState::Running => "running",
            TaskState::Skipped(_) => "skipped",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Pending"),
            TaskState::Evaluating => write!(f, "Evaluating"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Skipped(reason @ (SkipReason::AlreadySatisfied | SkipReason::CheckMode)) => {
                write!(f, "Skipped ({})", reason)
            }
            TaskState::Skipped(reason) => write!(f, "Skipped: {}", reason),
            TaskState::Succeeded => write!(f, "Succeeded"),
            TaskState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Final record of one task on one host
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Task name
    pub task: String,
    /// Store key the result lives under
    pub key: String,
    pub state: TaskState,
    pub changed: bool,
    /// Failed, but `ignore_errors` let the host continue
    pub ignored: bool,
    /// This failure stopped the host's remaining tasks
    pub halts: bool,
    pub msg: Option<String>,
    /// Stored result, if one was recorded
    pub result: Option<serde_json::Value>,
}

impl TaskRecord {
    pub fn new(task: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            key: key.into(),
            state: TaskState::Pending,
            changed: false,
            ignored: false,
            halts: false,
            msg: None,
            result: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, TaskState::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.state, TaskState::Skipped(_))
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.state {
            TaskState::Skipped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.state {
            TaskState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}
