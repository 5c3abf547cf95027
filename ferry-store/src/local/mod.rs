//! File-backed backend implementing [`ChangeLog`](crate::ChangeLog) and
//! [`VersionedStore`](crate::VersionedStore).
//!
//! Layout under `root`:
//!
//! ```text
//! logs/functions.json      log function -> log table
//! logs/<log_table>.json    one change log
//! stores/<store>.json      one versioned store (all branches + replica cursors)
//! ```
//!
//! Every document is rewritten whole through `<path>.tmp` + rename, so a
//! crashed writer leaves the previous version in place.

mod changelog;
mod ops;
mod store;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StoreError};

pub use changelog::LogEntry;
pub use ops::{ChangeMessage, ExportedDelete, ExportedRow};
pub use store::LocalRow;

/// A versioned store and its change logs, kept as JSON documents on disk.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    fn functions_path(&self) -> PathBuf {
        self.logs_dir().join("functions.json")
    }

    fn log_path(&self, log_table: &str) -> PathBuf {
        self.logs_dir().join(format!("{log_table}.json"))
    }

    fn store_path(&self, store: &str) -> PathBuf {
        self.root.join("stores").join(format!("{store}.json"))
    }
}

/// Read a JSON document; `Ok(None)` when the file does not exist.
pub(crate) fn read_json_at<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document atomically via `<path>.tmp` + rename.
pub(crate) fn write_json_at<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid document path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}
