//! Import stage: change log → staging store import branch, per dataset.
//!
//! For each enabled dataset, in one edit session on the import branch:
//!
//! 1. retry the dataset's dead letters, oldest first;
//! 2. read the window `[last_watermark, now)` and apply every classified
//!    record, skipping ones already queued as dead letters;
//! 3. drop dead letters superseded by a newer successful record on the same
//!    key (they stay in the log, unpruned);
//! 4. commit, then prune the applied records and advance the watermark.
//!
//! Per-record failures are dead-lettered and never stop the batch. A store
//! that cannot be reached ends the stage; the run state is saved after
//! every dataset either way.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

use ferry_core::registry::{self, SkippedDataset};
use ferry_core::{ChangeRecord, Dataset, SequenceKey, SyncChannel, Value};
use ferry_store::{StoreError, TargetStore};

use crate::apply::{apply, Applied, RowMapping};
use crate::classify::{classify, Classification};
use crate::context::PipelineContext;
use crate::error::{ApplyError, StageError};
use crate::prune;
use crate::reader::{self, Window};
use crate::stages::Stage;
use crate::state::{self, record_failure, DatasetState, RunState};

/// Attempted vs succeeded count for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub attempted: usize,
    pub succeeded: usize,
}

impl fmt::Display for OpCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.succeeded, self.attempted)
    }
}

/// Before/after summary of one dataset's batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetReport {
    pub dataset: String,
    /// Records read from the new window.
    pub fetched: usize,
    pub ignored: usize,
    pub inserts: OpCounts,
    pub updates: OpCounts,
    pub deletes: OpCounts,
    /// Updates applied as inserts because the key was absent.
    pub update_fallbacks: usize,
    /// Dead letters retried at the start of the batch.
    pub retried: usize,
    /// Dead letters left after the batch.
    pub dead_lettered: usize,
    pub superseded: usize,
    pub pruned: usize,
    pub watermark: DateTime<Utc>,
}

impl DatasetReport {
    fn new(dataset: &Dataset) -> Self {
        Self {
            dataset: dataset.to_string(),
            fetched: 0,
            ignored: 0,
            inserts: OpCounts::default(),
            updates: OpCounts::default(),
            deletes: OpCounts::default(),
            update_fallbacks: 0,
            retried: 0,
            dead_lettered: 0,
            superseded: 0,
            pruned: 0,
            watermark: dataset.last_watermark,
        }
    }

    /// Records that changed (or confirmed) the target.
    pub fn applied(&self) -> usize {
        self.inserts.succeeded + self.updates.succeeded + self.deletes.succeeded
    }

    fn tally(&mut self, kind: Classification, outcome: &Step) {
        let counts = match kind {
            Classification::Insert => &mut self.inserts,
            Classification::Update => &mut self.updates,
            Classification::Delete => &mut self.deletes,
            Classification::Ignore => return,
        };
        counts.attempted += 1;
        if let Step::Applied(applied) = outcome {
            counts.succeeded += 1;
            if *applied == Applied::InsertedFromUpdate {
                self.update_fallbacks += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub datasets: Vec<DatasetReport>,
    pub skipped: Vec<SkippedDataset>,
}

impl ImportReport {
    pub fn applied(&self) -> usize {
        self.datasets.iter().map(DatasetReport::applied).sum()
    }
}

/// Import every enabled dataset of `channel`, with windows ending at `end`.
pub fn import_channel(
    ctx: &PipelineContext<'_>,
    channel: &SyncChannel,
    state: &mut RunState,
    end: DateTime<Utc>,
) -> Result<ImportReport, StageError> {
    let view = registry::datasets(channel, |table| state.watermark(table)).map_err(|e| {
        StageError::Local {
            stage: Stage::Import,
            source: e.into(),
        }
    })?;
    for skipped in &view.skipped {
        tracing::info!(
            channel = %channel.name,
            dataset = %skipped.log_table,
            reason = %skipped.reason,
            "dataset skipped"
        );
    }

    let mut report = ImportReport {
        datasets: Vec::new(),
        skipped: view.skipped,
    };
    for dataset in &view.enabled {
        let result = import_dataset(ctx, channel, dataset, state.dataset_mut(&dataset.log_table), end);
        state::save_at(&ctx.config.state_dir, &channel.name.0, state).map_err(|source| {
            StageError::Local {
                stage: Stage::Import,
                source,
            }
        })?;
        report.datasets.push(result?);
    }
    Ok(report)
}

enum Step {
    Applied(Applied),
    Failed(ApplyError),
}

/// Apply one record. Connectivity failures come back as `Err`; anything
/// else is a per-record failure.
fn step<T>(
    target: &mut T,
    mapping: &mut RowMapping,
    kind: Classification,
    record: &ChangeRecord,
) -> Result<Step, StoreError>
where
    T: TargetStore + ?Sized,
{
    match apply(target, mapping, kind, record) {
        Ok(applied) => Ok(Step::Applied(applied)),
        Err(ApplyError::Store(e)) if e.is_connectivity() => Err(e),
        Err(e) => Ok(Step::Failed(e)),
    }
}

fn import_dataset(
    ctx: &PipelineContext<'_>,
    channel: &SyncChannel,
    dataset: &Dataset,
    ds: &mut DatasetState,
    end: DateTime<Utc>,
) -> Result<DatasetReport, StageError> {
    let target_down = |source: StoreError| StageError::TargetUnavailable {
        dataset: dataset.to_string(),
        source,
    };
    let mut editor = ctx
        .stores
        .open_branch(&channel.staging.store, &channel.import_branch)
        .map_err(target_down)?;
    let mut mapping = RowMapping::resolve(&*editor, dataset).map_err(target_down)?;

    let mut report = DatasetReport::new(dataset);
    let mut applied: BTreeSet<SequenceKey> = BTreeSet::new();
    let mut landed: Vec<(SequenceKey, Value)> = Vec::new();
    let mut failures = Vec::new();

    let queued: BTreeSet<SequenceKey> = ds
        .dead_letters
        .iter()
        .map(|d| d.record.sequence_key.clone())
        .collect();
    let records = reader::read_window(ctx.log, dataset, Window::for_dataset(dataset, end))?;
    report.fetched = records.len();

    let retries = ds.dead_letters.iter().map(|d| &d.record);
    let fresh = records.iter().filter(|r| !queued.contains(&r.sequence_key));
    for (retry, record) in retries.map(|r| (true, r)).chain(fresh.map(|r| (false, r))) {
        let kind = classify(record.operation_code);
        if kind == Classification::Ignore {
            report.ignored += 1;
            continue;
        }
        if retry {
            report.retried += 1;
        }
        let outcome = step(&mut *editor, &mut mapping, kind, record).map_err(target_down)?;
        report.tally(kind, &outcome);
        match outcome {
            Step::Applied(_) => {
                applied.insert(record.sequence_key.clone());
                if let Ok(key) = mapping.key(record) {
                    landed.push((record.sequence_key.clone(), key.clone()));
                }
            }
            Step::Failed(err) => {
                log_failure(dataset, kind, record, &err);
                if retry {
                    if let Some(previous) = ds
                        .dead_letters
                        .iter()
                        .find(|d| d.record.sequence_key == record.sequence_key)
                    {
                        failures.push(previous.clone());
                    }
                }
                record_failure(&mut failures, record, err.to_string(), end);
            }
        }
    }

    failures.retain(|letter| {
        let superseded = mapping.key(&letter.record).is_ok_and(|key| {
            landed
                .iter()
                .any(|(seq, k)| *seq > letter.record.sequence_key && k.key_eq(key))
        });
        if superseded {
            tracing::info!(
                dataset = %dataset,
                seq = %letter.record.sequence_key,
                "dead letter superseded by a newer change"
            );
            report.superseded += 1;
        }
        !superseded
    });

    editor.commit().map_err(target_down)?;
    ds.dead_letters = failures;
    report.dead_lettered = ds.dead_letters.len();
    report.pruned = prune::prune_and_advance(ctx.log, dataset, &applied, end, ds)?;
    report.watermark = ds.last_watermark;

    tracing::info!(
        dataset = %dataset,
        fetched = report.fetched,
        ignored = report.ignored,
        inserts = %report.inserts,
        updates = %report.updates,
        deletes = %report.deletes,
        update_fallbacks = report.update_fallbacks,
        retried = report.retried,
        dead_lettered = report.dead_lettered,
        superseded = report.superseded,
        pruned = report.pruned,
        "imported dataset"
    );
    Ok(report)
}

fn log_failure(dataset: &Dataset, kind: Classification, record: &ChangeRecord, err: &ApplyError) {
    let key = record
        .value(&dataset.log_primary_key)
        .map(ToString::to_string)
        .unwrap_or_else(|| "<missing>".to_string());
    match err {
        ApplyError::DuplicateKey { .. } => tracing::warn!(
            dataset = %dataset,
            table = %dataset.target_table,
            operation = %kind,
            key = %key,
            seq = %record.sequence_key,
            error = %err,
            "record not applied"
        ),
        _ => tracing::error!(
            dataset = %dataset,
            table = %dataset.target_table,
            operation = %kind,
            key = %key,
            seq = %record.sequence_key,
            error = %err,
            "record not applied"
        ),
    }
}
