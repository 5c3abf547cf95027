//! Import pipeline orchestrator.
//!
//! ```text
//! Idle → Locked → Importing → Reconciling → Syncing → Compacting → Unlocked
//!                     └────────────┴────────────┴───────────┴──→ Unlocked (aborted)
//! ```
//!
//! One lock marker covers the whole invocation. Each channel runs its
//! stages in order; a stage failure skips that channel's remaining stages
//! but not the other channels. The marker is removed on every exit path.

use std::fmt;

use chrono::{DateTime, Utc};

use ferry_core::{ChannelName, SyncChannel};

use crate::context::PipelineContext;
use crate::error::{StageError, SyncError};
use crate::import::{self, ImportReport};
use crate::lock::{Acquire, LockFile};
use crate::stages::{self, Stage};
use crate::state::{self, LastRun};

/// Which channels a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Channel(String),
}

/// A state of the import state machine.
///
/// `Idle`, `Locked` and `Unlocked` belong to the whole invocation and are
/// recorded on [`RunSummary`]; the stage phases are recorded per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Locked,
    Importing,
    Reconciling,
    Syncing,
    Compacting,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Nothing was applied and downstream stages were skipped.
    NoChanges,
    Disabled,
    /// Another run holds the lock marker; nothing was touched.
    AlreadyRunning { since: Option<DateTime<Utc>> },
    Aborted { stage: Stage, reason: String },
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Aborted { .. })
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::NoChanges => f.write_str("no changes"),
            RunOutcome::Disabled => f.write_str("disabled"),
            RunOutcome::AlreadyRunning { since: Some(t) } => {
                write!(f, "already running since {}", t.to_rfc3339())
            }
            RunOutcome::AlreadyRunning { since: None } => f.write_str("already running"),
            RunOutcome::Aborted { stage, reason } => write!(f, "aborted in {stage}: {reason}"),
        }
    }
}

/// What happened to one channel during a run.
#[derive(Debug, Clone)]
pub struct ChannelRun {
    pub channel: ChannelName,
    pub outcome: RunOutcome,
    /// Stage phases this channel entered, in order.
    pub phases: Vec<RunPhase>,
    pub import: Option<ImportReport>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the lock marker was already held; `channels` is then empty.
    pub already_running: Option<RunOutcome>,
    /// Invocation-level phases entered, in order.
    pub phases: Vec<RunPhase>,
    pub channels: Vec<ChannelRun>,
}

impl RunSummary {
    pub fn is_failure(&self) -> bool {
        self.channels.iter().any(|c| c.outcome.is_failure())
    }
}

/// Resolve `scope` against the config. Fails before anything is touched.
pub(crate) fn channels_in_scope<'c>(
    ctx: &PipelineContext<'c>,
    scope: &Scope,
) -> Result<Vec<&'c SyncChannel>, SyncError> {
    match scope {
        Scope::All => Ok(ctx.config.channels.iter().collect()),
        Scope::Channel(name) => Ok(vec![ctx.config.channel(name)?]),
    }
}

/// Run the import pipeline for every channel in `scope`.
pub fn run_import(ctx: &PipelineContext<'_>, scope: Scope) -> Result<RunSummary, SyncError> {
    let channels = channels_in_scope(ctx, &scope)?;
    let started_at = ctx.clock.now();
    let mut phases = vec![RunPhase::Idle];
    let lock = LockFile::new(&ctx.config.lock_file, ctx.config.stale_lock_after());

    let guard = match lock.acquire(started_at)? {
        Acquire::Acquired(guard) => guard,
        Acquire::Held { since } => {
            tracing::warn!(
                path = %lock.path().display(),
                since = ?since,
                "another import is running; exiting"
            );
            return Ok(RunSummary {
                started_at,
                finished_at: ctx.clock.now(),
                already_running: Some(RunOutcome::AlreadyRunning { since }),
                phases,
                channels: Vec::new(),
            });
        }
    };
    phases.push(RunPhase::Locked);
    tracing::info!(phase = ?RunPhase::Locked, channels = channels.len(), "import run started");

    let mut runs = Vec::with_capacity(channels.len());
    for channel in channels {
        runs.push(run_channel(ctx, channel, started_at));
    }

    guard.release()?;
    phases.push(RunPhase::Unlocked);
    tracing::info!(phase = ?RunPhase::Unlocked, "import run finished");
    Ok(RunSummary {
        started_at,
        finished_at: ctx.clock.now(),
        already_running: None,
        phases,
        channels: runs,
    })
}

fn run_channel(ctx: &PipelineContext<'_>, channel: &SyncChannel, now: DateTime<Utc>) -> ChannelRun {
    let mut run = ChannelRun {
        channel: channel.name.clone(),
        outcome: RunOutcome::Completed,
        phases: Vec::new(),
        import: None,
    };
    if channel.disabled {
        tracing::info!(channel = %channel.name, "channel disabled; skipping");
        run.outcome = RunOutcome::Disabled;
        return run;
    }

    let mut state = match state::load_at(&ctx.config.state_dir, &channel.name.0) {
        Ok(s) => s,
        Err(source) => {
            run.outcome = aborted(&StageError::Local {
                stage: Stage::Import,
                source,
            });
            return run;
        }
    };

    let outcome = match run_stages(ctx, channel, &mut state, now, &mut run) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(
                channel = %channel.name,
                stage = %err.stage(),
                error = %err,
                "run aborted"
            );
            aborted(&err)
        }
    };
    run.outcome = outcome;

    state.last_run = Some(LastRun {
        started_at: now,
        finished_at: ctx.clock.now(),
        outcome: run.outcome.to_string(),
    });
    if let Err(e) = state::save_at(&ctx.config.state_dir, &channel.name.0, &state) {
        tracing::warn!(channel = %channel.name, error = %e, "could not record last run");
    }
    run
}

fn run_stages(
    ctx: &PipelineContext<'_>,
    channel: &SyncChannel,
    state: &mut state::RunState,
    now: DateTime<Utc>,
    run: &mut ChannelRun,
) -> Result<RunOutcome, StageError> {
    run.phases.push(RunPhase::Importing);
    let report = import::import_channel(ctx, channel, state, now)?;
    let applied = report.applied();
    run.import = Some(report);

    if applied == 0 && ctx.config.skip_downstream_when_unchanged {
        tracing::info!(channel = %channel.name, "no changes applied; skipping downstream stages");
        return Ok(RunOutcome::NoChanges);
    }

    run.phases.push(RunPhase::Reconciling);
    stages::reconcile(ctx, channel)?;

    run.phases.push(RunPhase::Syncing);
    stages::sync(ctx, channel)?;

    run.phases.push(RunPhase::Compacting);
    stages::compact(ctx, channel)?;

    Ok(RunOutcome::Completed)
}

fn aborted(err: &StageError) -> RunOutcome {
    RunOutcome::Aborted {
        stage: err.stage(),
        reason: err.to_string(),
    }
}
