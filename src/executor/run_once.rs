//! Run-once coordination across host workers
//!
//! Each run-once task owns a write-once cell. The first host to reach the
//! task initializes the cell by executing it; every later host awaits the
//! same cell and receives the published outcome without executing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::task::TaskRecord;

/// Outcome published by the host that executed a run-once task
#[derive(Debug, Clone)]
pub struct RunOnceOutcome {
    pub host: String,
    pub record: TaskRecord,
}

/// What a host got back from the registry
#[derive(Debug, Clone)]
pub enum RunOnceResult {
    /// This host executed the task
    Executed(RunOnceOutcome),
    /// Another host executed it first
    Published(RunOnceOutcome),
}

#[derive(Debug, Default)]
pub struct RunOnceRegistry {
    cells: Mutex<HashMap<String, Arc<OnceCell<RunOnceOutcome>>>>,
}

impl RunOnceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<RunOnceOutcome>> {
        self.cells
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Execute `f` if nobody has yet, otherwise wait for the published outcome
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> RunOnceResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RunOnceOutcome>,
    {
        let cell = self.cell(key);
        let ran_here = AtomicBool::new(false);
        let outcome = cell
            .get_or_init(|| {
                ran_here.store(true, Ordering::SeqCst);
                f()
            })
            .await
            .clone();

        if ran_here.load(Ordering::SeqCst) {
            RunOnceResult::Executed(outcome)
        } else {
            RunOnceResult::Published(outcome)
        }
    }

    pub fn get(&self, key: &str) -> Option<RunOnceOutcome> {
        self.cells.lock().get(key).and_then(|c| c.get().cloned())
    }

    pub fn clear(&self) {
        self.cells.lock().clear();
    }
}
