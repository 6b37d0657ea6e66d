//! Execution callbacks
//!
//! Hooks the executor calls as a run progresses. All methods have empty
//! defaults so implementors only override what they need. Callbacks are
//! invoked from host workers concurrently and must not block.

use crate::executor::task::TaskRecord;
use crate::executor::HostSummary;

pub trait ExecutionCallback: Send + Sync {
    /// A play is starting on the given hosts
    fn on_play_start(&self, _play: &str, _hosts: &[String]) {}

    /// A task reached a terminal state on a host
    fn on_task_complete(&self, _host: &str, _record: &TaskRecord) {}

    /// A host finished its sequence (for the current play)
    fn on_host_complete(&self, _summary: &HostSummary) {}
}

/// Callback that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallback;

impl ExecutionCallback for NoopCallback {}
