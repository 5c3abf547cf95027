//! Error types for ferry-sync.

use std::path::PathBuf;

use thiserror::Error;

use ferry_core::{ConfigError, Value};
use ferry_store::StoreError;

use crate::stages::Stage;

/// Infrastructure errors: configuration, run state, lock marker, hand-off.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (run state).
    #[error("run state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The lock marker exists but holds no readable timestamp.
    #[error("lock marker at {path} is unreadable: {reason}")]
    LockUnreadable { path: PathBuf, reason: String },

    /// A handed-off file does not hash to the artifact it was copied from.
    #[error("checksum mismatch at {path}: expected {expected}, found {actual}")]
    Checksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Why a single change record could not be applied. Never fatal for the
/// batch unless [`ApplyError::is_connectivity`] holds.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("row with {field} = {key} already exists in {table}")]
    DuplicateKey {
        table: String,
        field: String,
        key: Value,
    },

    /// The update landed on the first match only.
    #[error("{count} rows in {table} match {field} = {key}; updated the first")]
    MultipleMatches {
        table: String,
        field: String,
        key: Value,
        count: usize,
    },

    #[error("record has no value for key field '{field}'")]
    MissingKey { field: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApplyError::Store(e) if e.is_connectivity())
    }
}

/// A failure that ends a pipeline stage (and with it the run for the
/// channel). Names the stage and the cause.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("change log for {dataset} is unavailable: {source}")]
    LogUnavailable {
        dataset: String,
        #[source]
        source: StoreError,
    },

    #[error("target store for {dataset} is unavailable: {source}")]
    TargetUnavailable {
        dataset: String,
        #[source]
        source: StoreError,
    },

    #[error("{stage} stage failed: {source}")]
    Store {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    #[error("{stage} stage failed: {source}")]
    Local {
        stage: Stage,
        #[source]
        source: SyncError,
    },
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::LogUnavailable { .. } | StageError::TargetUnavailable { .. } => {
                Stage::Import
            }
            StageError::Store { stage, .. } | StageError::Local { stage, .. } => *stage,
        }
    }
}
