//! Watermark & log pruner.
//!
//! Deletes the applied records from the change log, then advances the
//! dataset's watermark. A failed delete leaves the watermark where it was.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use ferry_core::{Dataset, SequenceKey};
use ferry_store::ChangeLog;

use crate::error::StageError;
use crate::state::DatasetState;

/// Prune `applied` from the dataset's log and move its watermark to `end`.
/// Returns how many log entries were deleted.
pub fn prune_and_advance(
    log: &dyn ChangeLog,
    dataset: &Dataset,
    applied: &BTreeSet<SequenceKey>,
    end: DateTime<Utc>,
    state: &mut DatasetState,
) -> Result<usize, StageError> {
    let deleted = log
        .delete_change_records(&dataset.log_table, applied)
        .map_err(|source| StageError::LogUnavailable {
            dataset: dataset.to_string(),
            source,
        })?;
    if deleted < applied.len() {
        tracing::warn!(
            dataset = %dataset,
            expected = applied.len(),
            deleted,
            "some applied records were already gone from the log"
        );
    }
    state.advance(end);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ferry_core::{Row, Value};
    use ferry_store::LocalBackend;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        Dataset {
            log_function: "fn_roads".into(),
            log_table: "roads_CT".into(),
            log_primary_key: "id".into(),
            target_table: "ROADS".into(),
            target_primary_key: "id".into(),
            spatial: None,
            last_watermark: ferry_core::registry::initial_watermark(),
        }
    }

    #[test]
    fn prunes_only_applied_keys_then_advances() {
        let tmp = TempDir::new().unwrap();
        let log = LocalBackend::new(tmp.path());
        log.create_log("fn_roads", "roads_CT").unwrap();
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut row = Row::new();
        row.insert("id".into(), Value::Int(1));
        let a = log.append_change("roads_CT", 2, row.clone(), t).unwrap();
        let _b = log.append_change("roads_CT", 4, row, t).unwrap();

        let mut state = DatasetState::default();
        let applied: BTreeSet<_> = [a].into_iter().collect();
        let end = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        let deleted = prune_and_advance(&log, &dataset(), &applied, end, &mut state).unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(log.log_entries("roads_CT").unwrap().len(), 1);
        assert_eq!(state.last_watermark, end);
    }

    #[test]
    fn failed_delete_keeps_watermark() {
        let tmp = TempDir::new().unwrap();
        let log = LocalBackend::new(tmp.path());
        let mut state = DatasetState::default();
        let before = state.last_watermark;
        let applied: BTreeSet<_> = [SequenceKey::from_counter(1)].into_iter().collect();
        let end = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();

        let err = prune_and_advance(&log, &dataset(), &applied, end, &mut state).unwrap_err();
        assert!(matches!(err, StageError::LogUnavailable { .. }));
        assert_eq!(state.last_watermark, before);
    }
}
