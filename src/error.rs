//! Error types for provisor.
//!
//! Each subsystem owns its own error enum; [`Error`] aggregates them for
//! callers that drive a whole run.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::executor::store::StoreError;
use crate::facts::ProbeError;
use crate::inventory::InventoryError;
use crate::modules::ActionError;
use crate::playbook::PlaybookError;
use crate::report::ReportError;
use crate::template::TemplateError;

/// Result type alias for provisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for provisor.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Input Errors
    // ========================================================================
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Playbook(#[from] PlaybookError),

    /// Neither the plays nor `--limit` selected any host.
    #[error("no hosts matched '{0}'")]
    NoHostsMatched(String),

    // ========================================================================
    // Execution Errors
    // ========================================================================
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    // ========================================================================
    // Rendering Errors
    // ========================================================================
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Report(#[from] ReportError),

    // ========================================================================
    // I/O Errors
    // ========================================================================
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Exit status for the CLI when the run could not complete.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Playbook(_) => 4,
            Error::Inventory(_) | Error::NoHostsMatched(_) => 5,
            _ => 1,
        }
    }
}
