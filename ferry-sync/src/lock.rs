//! Single-instance lock marker.
//!
//! The marker is a file holding the RFC 3339 time it was taken. It is
//! created with `create_new`, so the existence check and the creation are
//! one filesystem operation. A [`LockGuard`] removes the marker when it is
//! dropped, on every exit path.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{io_err, SyncError};

#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    stale_after: Option<Duration>,
}

/// Result of [`LockFile::acquire`].
#[derive(Debug)]
pub enum Acquire {
    Acquired(LockGuard),
    /// Another run holds the marker. `since` is `None` when the marker's
    /// timestamp could not be read.
    Held { since: Option<DateTime<Utc>> },
}

/// Owns the marker file; removing it on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>, stale_after: Option<Duration>) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// When the current marker was taken. `Ok(None)` if there is no marker.
    pub fn held_since(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        DateTime::parse_from_rfc3339(contents.trim())
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| SyncError::LockUnreadable {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Take the marker, stamped with `now`.
    ///
    /// A marker older than the configured stale age is replaced, with a
    /// warning; without a stale age an existing marker always wins.
    pub fn acquire(&self, now: DateTime<Utc>) -> Result<Acquire, SyncError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        if let Some(guard) = self.try_create(now)? {
            return Ok(Acquire::Acquired(guard));
        }

        let since = self.held_since().ok().flatten();
        if let (Some(max_age), Some(taken)) = (self.stale_after, since) {
            let age = now.signed_duration_since(taken).to_std().unwrap_or_default();
            if age > max_age {
                tracing::warn!(
                    path = %self.path.display(),
                    since = %taken.to_rfc3339(),
                    "replacing stale lock marker"
                );
                self.remove()?;
                if let Some(guard) = self.try_create(now)? {
                    return Ok(Acquire::Acquired(guard));
                }
            }
        }
        Ok(Acquire::Held { since })
    }

    /// Remove the marker regardless of who holds it. Returns whether one
    /// existed.
    pub fn remove(&self) -> Result<bool, SyncError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&self.path, e)),
        }
    }

    fn try_create(&self, now: DateTime<Utc>) -> Result<Option<LockGuard>, SyncError> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let guard = LockGuard {
            path: self.path.clone(),
            released: false,
        };
        file.write_all(now.to_rfc3339().as_bytes())
            .map_err(|e| io_err(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), "lock acquired");
        Ok(Some(guard))
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker now, reporting failure instead of logging it.
    pub fn release(mut self) -> Result<(), SyncError> {
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.path, e)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::error!(path = %self.path.display(), error = %e, "failed to remove lock marker");
            }
        }
    }
}
