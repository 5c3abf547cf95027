//! Run state: per-channel watermarks, dead letters and the last run.
//!
//! Persists a [`RunState`] JSON document at `<state_dir>/<channel>.json`.
//! Writes use the atomic `.tmp` + rename pattern.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::registry::initial_watermark;
use ferry_core::{ChangeRecord, SequenceKey};

use crate::error::{io_err, SyncError};

/// On-disk run state of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Keyed by log table.
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<LastRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetState {
    pub last_watermark: DateTime<Utc>,
    /// Records that failed to apply, oldest sequence first.
    #[serde(default)]
    pub dead_letters: Vec<DeadLetter>,
}

impl Default for DatasetState {
    fn default() -> Self {
        Self {
            last_watermark: initial_watermark(),
            dead_letters: Vec::new(),
        }
    }
}

/// A change record kept for retry after it failed to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub record: ChangeRecord,
    pub reason: String,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
}

impl RunState {
    pub fn watermark(&self, log_table: &str) -> Option<DateTime<Utc>> {
        self.datasets.get(log_table).map(|d| d.last_watermark)
    }

    pub fn dataset_mut(&mut self, log_table: &str) -> &mut DatasetState {
        self.datasets.entry(log_table.to_string()).or_default()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.datasets.values().map(|d| d.dead_letters.len()).sum()
    }
}

impl DatasetState {
    /// Move the watermark forward. Never moves it back.
    pub fn advance(&mut self, to: DateTime<Utc>) -> bool {
        if to > self.last_watermark {
            self.last_watermark = to;
            return true;
        }
        false
    }

    pub fn is_dead_letter(&self, key: &SequenceKey) -> bool {
        self.dead_letters
            .iter()
            .any(|d| &d.record.sequence_key == key)
    }
}

/// Record a failed attempt in `letters`, keyed by sequence key.
pub fn record_failure(
    letters: &mut Vec<DeadLetter>,
    record: &ChangeRecord,
    reason: String,
    at: DateTime<Utc>,
) {
    if let Some(existing) = letters
        .iter_mut()
        .find(|d| d.record.sequence_key == record.sequence_key)
    {
        existing.attempts += 1;
        existing.reason = reason;
        existing.last_failed_at = at;
        return;
    }
    letters.push(DeadLetter {
        record: record.clone(),
        reason,
        attempts: 1,
        first_failed_at: at,
        last_failed_at: at,
    });
    letters.sort_by(|a, b| a.record.sequence_key.cmp(&b.record.sequence_key));
}

/// `<state_dir>/<channel>.json`: pure, no I/O.
pub fn state_path_at(state_dir: &Path, channel: &str) -> PathBuf {
    state_dir.join(format!("{channel}.json"))
}

/// Load the run state for `channel`. Missing file = fresh state.
pub fn load_at(state_dir: &Path, channel: &str) -> Result<RunState, SyncError> {
    let path = state_path_at(state_dir, channel);
    if !path.exists() {
        return Ok(RunState::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the run state for `channel` atomically.
pub fn save_at(state_dir: &Path, channel: &str, state: &RunState) -> Result<(), SyncError> {
    let path = state_path_at(state_dir, channel);
    std::fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;

    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
