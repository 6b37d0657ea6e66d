//! Per-host report rendering.
//!
//! A report is a strict template rendered against one host's store snapshot
//! and written to
//! `{reports_dir}/{run_timestamp}_{report_kind}_{host_name}.{ext}`.
//! The directory is created on demand and the file is written through a
//! temporary file in the same directory, then renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::template::{TemplateEngine, TemplateError};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to write report '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid report {field} '{value}'")]
    InvalidName { field: &'static str, value: String },
}

/// Renders and writes reports
#[derive(Debug)]
pub struct ReportRenderer {
    engine: TemplateEngine,
    reports_dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: TemplateEngine::strict(),
            reports_dir: reports_dir.into(),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Render a template; undefined references are errors
    pub fn render(
        &self,
        name: &str,
        source: &str,
        context: &serde_json::Value,
    ) -> Result<String, TemplateError> {
        self.engine.render(name, source, context)
    }

    /// Deterministic output path for a report
    pub fn report_path(
        &self,
        run_timestamp: &str,
        kind: &str,
        host: &str,
        ext: &str,
    ) -> Result<PathBuf, ReportError> {
        validate_component("kind", kind)?;
        validate_component("extension", ext)?;
        let file_name = format!(
            "{}_{}_{}.{}",
            sanitize(run_timestamp),
            kind,
            sanitize(host),
            ext.trim_start_matches('.')
        );
        Ok(self.reports_dir.join(file_name))
    }

    /// Render and write a report, returning its path
    #[allow(clippy::too_many_arguments)]
    pub fn write_report(
        &self,
        run_timestamp: &str,
        kind: &str,
        host: &str,
        ext: &str,
        template_name: &str,
        source: &str,
        context: &serde_json::Value,
    ) -> Result<PathBuf, ReportError> {
        let path = self.report_path(run_timestamp, kind, host, ext)?;
        let content = self.render(template_name, source, context)?;
        self.write_atomic(&path, content.as_bytes())?;
        debug!(host = %host, path = %path.display(), "Wrote report");
        Ok(path)
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), ReportError> {
        let io_error = |source: std::io::Error| ReportError::Io {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(&self.reports_dir).map_err(io_error)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.reports_dir).map_err(io_error)?;
        tmp.write_all(content).map_err(io_error)?;
        tmp.flush().map_err(io_error)?;
        tmp.persist(path).map_err(|e| io_error(e.error))?;
        Ok(())
    }
}

fn validate_component(field: &'static str, value: &str) -> Result<(), ReportError> {
    let trimmed = value.trim_start_matches('.');
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ReportError::InvalidName {
            field,
            value: value.to_string(),
        })
    }
}

/// Keep file names portable
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
