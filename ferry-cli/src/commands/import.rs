//! `ferry import`: one run of the import pipeline.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use ferry_store::LocalBackend;
use ferry_sync::{run_import, ChannelRun, DatasetReport, PipelineContext, RunSummary, SystemClock};

use super::{load_config, outcome_label, scope};

/// Arguments for `ferry import`.
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Only run this channel.
    #[arg(long)]
    pub channel: Option<String>,
}

#[derive(Tabled)]
struct DatasetRow {
    #[tabled(rename = "dataset")]
    dataset: String,
    #[tabled(rename = "fetched")]
    fetched: usize,
    #[tabled(rename = "inserts")]
    inserts: String,
    #[tabled(rename = "updates")]
    updates: String,
    #[tabled(rename = "deletes")]
    deletes: String,
    #[tabled(rename = "ignored")]
    ignored: usize,
    #[tabled(rename = "dead letters")]
    dead_letters: usize,
    #[tabled(rename = "pruned")]
    pruned: usize,
    #[tabled(rename = "watermark")]
    watermark: String,
}

impl From<&DatasetReport> for DatasetRow {
    fn from(r: &DatasetReport) -> Self {
        Self {
            dataset: r.dataset.clone(),
            fetched: r.fetched,
            inserts: r.inserts.to_string(),
            updates: r.updates.to_string(),
            deletes: r.deletes.to_string(),
            ignored: r.ignored,
            dead_letters: r.dead_lettered,
            pruned: r.pruned,
            watermark: r.watermark.to_rfc3339(),
        }
    }
}

impl ImportArgs {
    pub fn run(self, config: Option<&Path>) -> Result<ExitCode> {
        let config = load_config(config)?;
        let backend = LocalBackend::new(&config.data_dir);
        let clock = SystemClock;
        let ctx = PipelineContext::new(&config, &backend, &backend, &clock);

        let summary = run_import(&ctx, scope(self.channel)).context("import run failed")?;
        print_summary(&summary);
        Ok(if summary.is_failure() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

fn print_summary(summary: &RunSummary) {
    if let Some(outcome) = &summary.already_running {
        println!("{} {outcome}; nothing to do", outcome_label(outcome));
        return;
    }
    for run in &summary.channels {
        print_channel(run);
    }
}

fn print_channel(run: &ChannelRun) {
    println!("{} {}", run.channel.to_string().bold(), outcome_label(&run.outcome));
    if run.outcome.is_failure() {
        println!("  {}", run.outcome.to_string().red());
    }
    let Some(report) = &run.import else {
        return;
    };
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.log_table, skipped.reason);
    }
    if report.datasets.is_empty() {
        return;
    }
    let rows: Vec<DatasetRow> = report.datasets.iter().map(DatasetRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
