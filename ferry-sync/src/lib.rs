//! # ferry-sync
//!
//! The change-data-capture replication engine.
//!
//! [`pipeline::run_import`] takes the single-instance lock and, per channel,
//! pulls change-log windows into the staging store's import branch,
//! reconciles that branch into the staging baseline, syncs staging to
//! production and compacts both. [`export::run_export`] drives the reverse
//! direction and hands the resulting change message to a downstream
//! consumer.

pub mod apply;
pub mod classify;
pub mod context;
pub mod error;
pub mod export;
pub mod handoff;
pub mod import;
pub mod lock;
pub mod pipeline;
pub mod prune;
pub mod reader;
pub mod stages;
pub mod state;

pub use context::{Clock, FixedClock, PipelineContext, SystemClock};
pub use error::{ApplyError, StageError, SyncError};
pub use export::{run_export, ExportRun, ExportSummary};
pub use import::{DatasetReport, ImportReport, OpCounts};
pub use pipeline::{run_import, ChannelRun, RunOutcome, RunPhase, RunSummary, Scope};
pub use stages::Stage;
