//! Export pipeline: production edits flow back to staging and out to the
//! downstream consumer as a change-message artifact.
//!
//! Per channel, under its own lock marker (`<lock_file>.export`):
//!
//! 1. fold production edit branches into the baseline (`auto_reconcile` only);
//! 2. export a change message from production into `temp_path`;
//! 3. sync production onto staging;
//! 4. fold staging edit branches into the staging baseline;
//! 5. compact production;
//! 6. hand the artifact off to `export_path`.
//!
//! Steps 2 and 3 abort the channel. The others only add a warning.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use ferry_core::{ChannelName, SyncChannel};
use ferry_store::ExportReport;

use crate::context::PipelineContext;
use crate::error::{io_err, StageError, SyncError};
use crate::handoff::{self, HandoffReceipt};
use crate::lock::{Acquire, LockFile};
use crate::pipeline::{channels_in_scope, RunOutcome, Scope};
use crate::stages::{self, Stage};

/// What happened to one channel during an export run.
#[derive(Debug, Clone)]
pub struct ExportRun {
    pub channel: ChannelName,
    pub outcome: RunOutcome,
    pub exported: Option<ExportReport>,
    /// Temp artifact, if it was written and kept.
    pub artifact: Option<PathBuf>,
    pub handoff: Option<HandoffReceipt>,
    /// Failures of the non-fatal steps.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub already_running: Option<RunOutcome>,
    pub channels: Vec<ExportRun>,
}

impl ExportSummary {
    pub fn is_failure(&self) -> bool {
        self.channels.iter().any(|c| c.outcome.is_failure())
    }
}

/// Lock marker path for export runs, next to the import marker.
pub fn export_lock_path(config: &ferry_core::Config) -> PathBuf {
    PathBuf::from(format!("{}.export", config.lock_file.display()))
}

/// Run the export pipeline for every channel in `scope`.
pub fn run_export(ctx: &PipelineContext<'_>, scope: Scope) -> Result<ExportSummary, SyncError> {
    let channels = channels_in_scope(ctx, &scope)?;
    let started_at = ctx.clock.now();
    let lock = LockFile::new(export_lock_path(ctx.config), ctx.config.stale_lock_after());

    let guard = match lock.acquire(started_at)? {
        Acquire::Acquired(guard) => guard,
        Acquire::Held { since } => {
            tracing::warn!(
                path = %lock.path().display(),
                since = ?since,
                "another export is running; exiting"
            );
            return Ok(ExportSummary {
                started_at,
                finished_at: ctx.clock.now(),
                already_running: Some(RunOutcome::AlreadyRunning { since }),
                channels: Vec::new(),
            });
        }
    };

    let mut runs = Vec::with_capacity(channels.len());
    for channel in channels {
        runs.push(export_channel(ctx, channel, started_at));
    }

    guard.release()?;
    Ok(ExportSummary {
        started_at,
        finished_at: ctx.clock.now(),
        already_running: None,
        channels: runs,
    })
}

fn export_channel(ctx: &PipelineContext<'_>, channel: &SyncChannel, now: DateTime<Utc>) -> ExportRun {
    let mut run = ExportRun {
        channel: channel.name.clone(),
        outcome: RunOutcome::Completed,
        exported: None,
        artifact: None,
        handoff: None,
        warnings: Vec::new(),
    };
    if channel.disabled {
        tracing::info!(channel = %channel.name, "channel disabled; skipping");
        run.outcome = RunOutcome::Disabled;
        return run;
    }

    if let Err(err) = export_steps(ctx, channel, now, &mut run) {
        tracing::error!(
            channel = %channel.name,
            stage = %err.stage(),
            error = %err,
            "export aborted"
        );
        run.outcome = RunOutcome::Aborted {
            stage: err.stage(),
            reason: err.to_string(),
        };
    }
    run
}

fn export_steps(
    ctx: &PipelineContext<'_>,
    channel: &SyncChannel,
    now: DateTime<Utc>,
    run: &mut ExportRun,
) -> Result<(), StageError> {
    let production = &channel.production;
    let staging = &channel.staging;
    let stamp = now.format("%Y%m%d%H%M%S");

    if channel.auto_reconcile && !production.edit_branches.is_empty() {
        let merged = stages::merge_branches(
            ctx,
            Stage::Reconcile,
            &production.store,
            &production.edit_branches,
            &production.baseline,
        );
        warn_on(run, merged);
    }

    std::fs::create_dir_all(&channel.temp_path).map_err(|e| StageError::Local {
        stage: Stage::Export,
        source: io_err(&channel.temp_path, e),
    })?;
    let artifact = channel.temp_path.join(format!("temp_{stamp}.json"));
    let exported = ctx
        .stores
        .export_changes(&production.store, &channel.replica, &artifact)
        .map_err(|source| StageError::Store {
            stage: Stage::Export,
            source,
        })?;
    tracing::info!(
        channel = %channel.name,
        artifact = %artifact.display(),
        upserts = exported.upserts,
        deletes = exported.deletes,
        "exported change message"
    );
    run.exported = Some(exported);
    run.artifact = Some(artifact.clone());

    stages::sync_stores(
        ctx,
        Stage::Sync,
        &production.store,
        &channel.replica,
        &staging.store,
    )?;

    if !staging.edit_branches.is_empty() {
        let merged = stages::merge_branches(
            ctx,
            Stage::Reconcile,
            &staging.store,
            &staging.edit_branches,
            &staging.baseline,
        );
        warn_on(run, merged);
    }

    let compacted = stages::compact_store(ctx, Stage::Compact, &production.store);
    warn_on(run, compacted);

    match handoff::hand_off(&artifact, &channel.export_path, &format!("changes_{stamp}.json")) {
        Ok(receipt) => {
            run.handoff = Some(receipt);
            if channel.delete_temp_files {
                match std::fs::remove_file(&artifact) {
                    Ok(()) => run.artifact = None,
                    Err(e) => {
                        tracing::warn!(path = %artifact.display(), error = %e, "could not delete temp artifact");
                        run.warnings.push(format!("could not delete {}: {e}", artifact.display()));
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                channel = %channel.name,
                stage = %Stage::Handoff,
                error = %e,
                "hand-off failed; artifact kept"
            );
            run.warnings.push(format!("{}: {e}", Stage::Handoff));
        }
    }
    Ok(())
}

fn warn_on<T>(run: &mut ExportRun, result: Result<T, StageError>) {
    if let Err(err) = result {
        tracing::warn!(stage = %err.stage(), error = %err, "step failed; continuing");
        run.warnings.push(format!("{}: {err}", err.stage()));
    }
}
