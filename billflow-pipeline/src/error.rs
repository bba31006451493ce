//! Error types for billflow-pipeline.

use std::path::PathBuf;

use thiserror::Error;

use billflow_core::{ConfigError, ItemId, Stage, StoreError};

/// A stage collaborator failed for one item.
///
/// Everything except [`StageError::Store`] is recovered by the orchestrator:
/// the item keeps its needs-flag and is retried on the next run.
#[derive(Debug, Error)]
pub enum StageError {
    /// The state store could not persist a transition. Fatal.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("no {0} collaborator configured")]
    NotConfigured(Stage),

    /// An input artifact could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("`{program}` printed an invalid stage report: {source}")]
    Report {
        program: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode item record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Free-form failure raised by an in-process collaborator.
    #[error("{0}")]
    Failed(String),
}

impl StageError {
    /// Whether this failure must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StageError::Store(_))
    }
}

/// The item source could not produce the authoritative item list.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("item list is not a valid JSON array of identifiers: {0}")]
    Parse(#[from] serde_json::Error),

    /// An empty list would orphan every record; it is never trusted.
    #[error("item source returned no items")]
    Empty,
}

/// Report generation failed.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("report JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("item source failed: {0}")]
    Source(#[from] SourceError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("{stage} stage for '{item}' failed fatally: {source}")]
    FatalStage {
        item: ItemId,
        stage: Stage,
        #[source]
        source: StageError,
    },
}
