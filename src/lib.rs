//! # provisor - a minimal idempotent remote-task runner
//!
//! provisor opens one connection per inventory host, gathers a small set of
//! facts, runs an ordered task list against each host in parallel and writes
//! a per-host report rendered from everything the run recorded.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts and groups with connection details and variables
//! - **Playbook**: plays, each applying an ordered task list to a host pattern
//! - **Actions**: idempotent units of work (package, service, copy, ...)
//! - **Store**: write-once results keyed per host, plus a run-scoped partition
//!   for run-once tasks
//! - **Reports**: strict templates rendered from the store after the tasks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────────────────────┐
//! │  Connection  │──▶│ Fact Collector │──▶│        Task Executor         │
//! │   Provider   │   │  (read-only    │   │ predicate ─▶ run-once ─▶ site │
//! │ (ssh, local) │   │    probes)     │   │      ─▶ action ─▶ store       │
//! └──────────────┘   └────────────────┘   └──────────────┬───────────────┘
//!                                                        │
//!                                         ┌──────────────▼───────────────┐
//!                                         │ Fact/Result Store ─▶ Report  │
//!                                         │          Renderer            │
//!                                         └──────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use provisor::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let inventory = Inventory::load("inventory.yml")?;
//!     let playbook = Playbook::load("site.yml")?;
//!
//!     let provider = Arc::new(ConnectionFactory::default());
//!     let executor = Executor::new(ExecutorConfig::default(), provider);
//!
//!     let summary = executor.run(&playbook, &inventory).await?;
//!     std::process::exit(summary.exit_code());
//! }
//! ```

#![warn(clippy::all)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::callback::ExecutionCallback;
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionFactory, ConnectionProvider,
        ConnectionResult, ExecuteOptions, LocalConnection, RetryConfig, SshSettings,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::task::{SkipReason, TaskRecord, TaskState};
    pub use crate::executor::{Executor, ExecutorConfig, HostStatus, HostSummary, RunSummary};
    pub use crate::facts::{FactCollector, Facts};
    pub use crate::inventory::{Group, Host, Inventory};
    pub use crate::modules::{Action, ModuleOutput, OutcomeKind};
    pub use crate::playbook::{Play, Playbook, Task};
    pub use crate::report::ReportRenderer;
    pub use crate::template::TemplateEngine;
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Hooks invoked as tasks and hosts complete.
pub mod callback;

// ============================================================================
// Inputs
// ============================================================================

/// Hosts, groups, variables and host patterns.
pub mod inventory;

/// Playbook parsing and load-time validation.
pub mod playbook;

// ============================================================================
// Execution
// ============================================================================

/// Transport to target hosts: SSH via russh, plus the local controller channel.
pub mod connection;

/// Read-only fact probes.
pub mod facts;

/// Per-host task execution, the result store and run-once coordination.
pub mod executor;

/// The idempotent actions a task can name.
pub mod modules;

// ============================================================================
// Rendering
// ============================================================================

/// minijinja wrapper with strict and lenient undefined handling.
pub mod template;

/// Per-host report files.
pub mod report;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
