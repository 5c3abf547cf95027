//! Change log reader.
//!
//! A dataset's window is `[last_watermark, end)`. The log is ordered by
//! sequence key rather than indexed by time, so both ends are first mapped
//! onto keys: the start to the first entry committed at or after it, the
//! end to the last entry committed strictly before it.

use chrono::{DateTime, Utc};

use ferry_core::{ChangeRecord, Dataset};
use ferry_store::{ChangeLog, SequenceBound, StoreError};

use crate::error::StageError;

/// Half-open commit-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn for_dataset(dataset: &Dataset, end: DateTime<Utc>) -> Self {
        Self {
            start: dataset.last_watermark,
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Every change committed inside `window`, ascending by sequence key.
///
/// No changes is an empty vec, not an error.
pub fn read_window(
    log: &dyn ChangeLog,
    dataset: &Dataset,
    window: Window,
) -> Result<Vec<ChangeRecord>, StageError> {
    if window.is_empty() {
        return Ok(Vec::new());
    }
    let unavailable = |source: StoreError| StageError::LogUnavailable {
        dataset: dataset.to_string(),
        source,
    };

    let start = log
        .map_time_to_sequence(
            &dataset.log_function,
            window.start,
            SequenceBound::FirstAtOrAfter,
        )
        .map_err(unavailable)?;
    let end = log
        .map_time_to_sequence(&dataset.log_function, window.end, SequenceBound::LastBefore)
        .map_err(unavailable)?;

    let (Some(start), Some(end)) = (start, end) else {
        tracing::debug!(dataset = %dataset, "no changes in window");
        return Ok(Vec::new());
    };
    if start > end {
        return Ok(Vec::new());
    }

    let mut records = log
        .changes(&dataset.log_function, &start, &end)
        .map_err(unavailable)?;
    records.sort_by(|a, b| a.sequence_key.cmp(&b.sequence_key));
    tracing::debug!(
        dataset = %dataset,
        from = %start,
        to = %end,
        count = records.len(),
        "read change window"
    );
    Ok(records)
}
