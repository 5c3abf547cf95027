//! Branch merge, cross-store sync and compaction stages.
//!
//! Each stage is one or more blocking store calls wrapped in a
//! `Begin <stage>` / `End <stage>` log pair. A store error becomes a
//! [`StageError`] naming the stage.

use std::fmt;

use serde::Serialize;

use ferry_core::{BranchName, StoreName, SyncChannel};
use ferry_store::{
    CompactReport, MergeFavor, MergeReport, StoreError, SyncFavor, SyncReport,
};

use crate::context::PipelineContext;
use crate::error::StageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Import,
    Reconcile,
    Sync,
    Compact,
    Export,
    Handoff,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Import => "import",
            Stage::Reconcile => "reconcile",
            Stage::Sync => "sync",
            Stage::Compact => "compact",
            Stage::Export => "export",
            Stage::Handoff => "handoff",
        };
        f.write_str(name)
    }
}

fn run_stage<T: fmt::Debug>(
    stage: Stage,
    what: &str,
    op: impl FnOnce() -> Result<T, StoreError>,
) -> Result<T, StageError> {
    tracing::info!(stage = %stage, "Begin {what}");
    match op() {
        Ok(report) => {
            tracing::info!(stage = %stage, ?report, "End {what}");
            Ok(report)
        }
        Err(source) => {
            tracing::error!(stage = %stage, error = %source, "{what} failed");
            Err(StageError::Store { stage, source })
        }
    }
}

/// Merge `branches` into `baseline` on `store`, edits winning conflicts.
pub fn merge_branches(
    ctx: &PipelineContext<'_>,
    stage: Stage,
    store: &StoreName,
    branches: &[BranchName],
    baseline: &BranchName,
) -> Result<MergeReport, StageError> {
    let what = format!("merge {store}: {} -> {baseline}", join(branches));
    run_stage(stage, &what, || {
        ctx.stores
            .merge(store, branches, baseline, MergeFavor::EditBranch)
    })
}

/// One-way baseline sync, source wins.
pub fn sync_stores(
    ctx: &PipelineContext<'_>,
    stage: Stage,
    source: &StoreName,
    replica: &str,
    destination: &StoreName,
) -> Result<SyncReport, StageError> {
    let what = format!("sync {source} -> {destination} ({replica})");
    run_stage(stage, &what, || {
        ctx.stores
            .sync(source, replica, destination, SyncFavor::Source)
    })
}

pub fn compact_store(
    ctx: &PipelineContext<'_>,
    stage: Stage,
    store: &StoreName,
) -> Result<CompactReport, StageError> {
    run_stage(stage, &format!("compact {store}"), || {
        ctx.stores.compact(store)
    })
}

/// Import direction: fold the import branch into the staging baseline and
/// compact staging.
pub fn reconcile(ctx: &PipelineContext<'_>, channel: &SyncChannel) -> Result<MergeReport, StageError> {
    let report = merge_branches(
        ctx,
        Stage::Reconcile,
        &channel.staging.store,
        std::slice::from_ref(&channel.import_branch),
        &channel.staging.baseline,
    )?;
    compact_store(ctx, Stage::Reconcile, &channel.staging.store)?;
    Ok(report)
}

/// Import direction: push the staging baseline onto production.
pub fn sync(ctx: &PipelineContext<'_>, channel: &SyncChannel) -> Result<SyncReport, StageError> {
    sync_stores(
        ctx,
        Stage::Sync,
        &channel.staging.store,
        &channel.replica,
        &channel.production.store,
    )
}

/// Compact both stores after a sync, destination first.
pub fn compact(ctx: &PipelineContext<'_>, channel: &SyncChannel) -> Result<(), StageError> {
    compact_store(ctx, Stage::Compact, &channel.production.store)?;
    compact_store(ctx, Stage::Compact, &channel.staging.store)?;
    Ok(())
}

fn join(branches: &[BranchName]) -> String {
    branches
        .iter()
        .map(|b| b.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
