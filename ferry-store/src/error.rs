//! Error types for ferry-store.

use std::path::PathBuf;

use thiserror::Error;

/// All errors a store backend can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A backing document exists but is not valid JSON for its schema.
    #[error("corrupt store document at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store could not be reached at all.
    #[error("{target} is unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    #[error("store '{store}' not found")]
    StoreNotFound { store: String },

    #[error("store '{store}' already exists")]
    StoreExists { store: String },

    #[error("branch '{branch}' not found in store '{store}'")]
    BranchNotFound { store: String, branch: String },

    #[error("invalid branch '{branch}' in store '{store}': {reason}")]
    InvalidBranch {
        store: String,
        branch: String,
        reason: String,
    },

    #[error("table '{table}' not found in store '{store}'")]
    TableNotFound { store: String, table: String },

    /// A write named a column the table does not have.
    #[error("table '{table}' has no field '{field}'")]
    UnknownField { table: String, field: String },

    #[error("no change log is registered for '{0}'")]
    UnknownLogFunction(String),

    #[error("change log table '{0}' not found")]
    LogNotFound(String),

    /// Source and destination of a replica operation are the same store.
    #[error("cannot replicate store '{0}' onto itself")]
    SameStore(String),
}

impl StoreError {
    /// Whether the failure means the backend could not be reached or read,
    /// as opposed to rejecting a specific request.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Io { .. } | StoreError::Corrupt { .. } | StoreError::Unavailable { .. }
        )
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
