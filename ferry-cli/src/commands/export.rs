//! `ferry export`: production edits back to staging, change message out.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use ferry_store::LocalBackend;
use ferry_sync::{run_export, ExportRun, PipelineContext, SystemClock};

use super::{load_config, outcome_label, scope};

/// Arguments for `ferry export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Only run this channel.
    #[arg(long)]
    pub channel: Option<String>,
}

impl ExportArgs {
    pub fn run(self, config: Option<&Path>) -> Result<ExitCode> {
        let config = load_config(config)?;
        let backend = LocalBackend::new(&config.data_dir);
        let clock = SystemClock;
        let ctx = PipelineContext::new(&config, &backend, &backend, &clock);

        let summary = run_export(&ctx, scope(self.channel)).context("export run failed")?;
        if let Some(outcome) = &summary.already_running {
            println!("{} {outcome}; nothing to do", outcome_label(outcome));
            return Ok(ExitCode::SUCCESS);
        }
        for run in &summary.channels {
            print_run(run);
        }
        Ok(if summary.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

fn print_run(run: &ExportRun) {
    println!("{} {}", run.channel.to_string().bold(), outcome_label(&run.outcome));
    if run.outcome.is_failure() {
        println!("  {}", run.outcome.to_string().red());
    }
    if let Some(exported) = run.exported {
        println!(
            "  exported {} upserts, {} deletes",
            exported.upserts, exported.deletes
        );
    }
    if let Some(receipt) = &run.handoff {
        println!(
            "  ✎  {} ({} bytes, sha256 {})",
            receipt.destination.display(),
            receipt.bytes,
            receipt.sha256.get(..12).unwrap_or_default()
        );
    }
    if let Some(artifact) = &run.artifact {
        println!("  ·  kept {}", artifact.display());
    }
    for warning in &run.warnings {
        println!("  {} {warning}", "warning:".yellow());
    }
}
