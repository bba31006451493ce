//! Error types for billflow-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ItemId;

/// All errors that can arise from state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted state document exists but cannot be parsed.
    #[error("state document at {path} is corrupt: {source}")]
    Corruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error on the write path.
    #[error("state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A partial update would have produced an ill-typed record.
    #[error("update for '{id}' produced an invalid record: {source}")]
    InvalidUpdate {
        id: ItemId,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while loading `billflow.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with the file path for context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
