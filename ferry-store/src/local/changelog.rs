use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::{ChangeRecord, Row, SequenceKey};

use super::{read_json_at, write_json_at, LocalBackend};
use crate::{ChangeLog, SequenceBound, StoreError};

/// One persisted change-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: SequenceKey,
    pub commit_time: DateTime<Utc>,
    pub operation: i32,
    pub columns: Row,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LogDoc {
    next_seq: u64,
    entries: Vec<LogEntry>,
}

impl LocalBackend {
    /// Register a change log for `log_function`, stored in `log_table`.
    /// Re-registering an existing pair is a no-op.
    pub fn create_log(&self, log_function: &str, log_table: &str) -> Result<(), StoreError> {
        let path = self.functions_path();
        let mut functions: BTreeMap<String, String> = read_json_at(&path)?.unwrap_or_default();
        functions.insert(log_function.to_string(), log_table.to_string());
        write_json_at(&path, &functions)?;

        let log_path = self.log_path(log_table);
        if !log_path.exists() {
            write_json_at(&log_path, &LogDoc::default())?;
        }
        Ok(())
    }

    /// Append one change to `log_table` and return its new sequence key.
    pub fn append_change(
        &self,
        log_table: &str,
        operation: i32,
        columns: Row,
        commit_time: DateTime<Utc>,
    ) -> Result<SequenceKey, StoreError> {
        let path = self.log_path(log_table);
        let mut doc: LogDoc =
            read_json_at(&path)?.ok_or_else(|| StoreError::LogNotFound(log_table.to_string()))?;
        doc.next_seq += 1;
        let seq = SequenceKey::from_counter(doc.next_seq);
        doc.entries.push(LogEntry {
            seq: seq.clone(),
            commit_time,
            operation,
            columns,
        });
        write_json_at(&path, &doc)?;
        Ok(seq)
    }

    /// Every entry still present in `log_table`, in sequence order.
    pub fn log_entries(&self, log_table: &str) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.load_log(log_table)?.entries)
    }

    fn load_log(&self, log_table: &str) -> Result<LogDoc, StoreError> {
        let mut doc: LogDoc = read_json_at(&self.log_path(log_table))?
            .ok_or_else(|| StoreError::LogNotFound(log_table.to_string()))?;
        doc.entries.sort_by(|a, b| a.seq.cmp(&b.seq));
        Ok(doc)
    }

    fn resolve_function(&self, log_function: &str) -> Result<String, StoreError> {
        let functions: BTreeMap<String, String> =
            read_json_at(&self.functions_path())?.unwrap_or_default();
        functions
            .get(log_function)
            .cloned()
            .ok_or_else(|| StoreError::UnknownLogFunction(log_function.to_string()))
    }
}

impl ChangeLog for LocalBackend {
    fn map_time_to_sequence(
        &self,
        log_function: &str,
        at: DateTime<Utc>,
        bound: SequenceBound,
    ) -> Result<Option<SequenceKey>, StoreError> {
        let table = self.resolve_function(log_function)?;
        let doc = self.load_log(&table)?;
        let key = match bound {
            SequenceBound::FirstAtOrAfter => doc
                .entries
                .iter()
                .filter(|e| e.commit_time >= at)
                .map(|e| &e.seq)
                .min(),
            SequenceBound::LastBefore => doc
                .entries
                .iter()
                .filter(|e| e.commit_time < at)
                .map(|e| &e.seq)
                .max(),
        };
        Ok(key.cloned())
    }

    fn changes(
        &self,
        log_function: &str,
        from: &SequenceKey,
        to: &SequenceKey,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        let table = self.resolve_function(log_function)?;
        let doc = self.load_log(&table)?;
        Ok(doc
            .entries
            .into_iter()
            .filter(|e| &e.seq >= from && &e.seq <= to)
            .map(|e| ChangeRecord {
                operation_code: e.operation,
                sequence_key: e.seq,
                columns: e.columns,
                source_table: table.clone(),
            })
            .collect())
    }

    fn delete_change_records(
        &self,
        log_table: &str,
        keys: &BTreeSet<SequenceKey>,
    ) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut doc = self.load_log(log_table)?;
        let before = doc.entries.len();
        doc.entries.retain(|e| !keys.contains(&e.seq));
        let removed = before - doc.entries.len();
        if removed > 0 {
            write_json_at(&self.log_path(log_table), &doc)?;
        }
        tracing::debug!(log_table, removed, "pruned change records");
        Ok(removed)
    }
}
