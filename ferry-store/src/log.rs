//! Change log contract.
//!
//! Logs are ordered by sequence key, not indexed by time, so a reader first
//! maps its time window onto sequence keys and then asks for the closed key
//! range.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use ferry_core::{ChangeRecord, SequenceKey};

use crate::StoreError;

/// Which side of a timestamp to snap to when mapping time onto the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceBound {
    /// Smallest key whose commit time is at or after the instant.
    FirstAtOrAfter,
    /// Largest key whose commit time is strictly before the instant.
    LastBefore,
}

/// A row-level change log (one capture instance per log function).
pub trait ChangeLog {
    /// Map `at` onto the log's key space. `None` when no entry qualifies.
    fn map_time_to_sequence(
        &self,
        log_function: &str,
        at: DateTime<Utc>,
        bound: SequenceBound,
    ) -> Result<Option<SequenceKey>, StoreError>;

    /// Every entry with `from <= key <= to`, ascending by key.
    fn changes(
        &self,
        log_function: &str,
        from: &SequenceKey,
        to: &SequenceKey,
    ) -> Result<Vec<ChangeRecord>, StoreError>;

    /// Delete the named entries from `log_table`; returns how many existed.
    fn delete_change_records(
        &self,
        log_table: &str,
        keys: &BTreeSet<SequenceKey>,
    ) -> Result<usize, StoreError>;
}
