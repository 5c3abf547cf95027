//! `ferry status`: datasets, watermarks, dead letters and lock state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use ferry_core::{registry, Config, SyncChannel};
use ferry_sync::export::export_lock_path;
use ferry_sync::lock::LockFile;
use ferry_sync::state::{self, RunState};

use super::load_config;

/// Arguments for `ferry status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let config = load_config(config)?;
        let report = build_report(&config)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(&report, Utc::now());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    locks: Vec<LockStatus>,
    channels: Vec<ChannelStatus>,
}

#[derive(Debug, Serialize)]
struct LockStatus {
    kind: &'static str,
    path: PathBuf,
    held: bool,
    since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ChannelStatus {
    name: String,
    disabled: bool,
    last_run: Option<LastRunStatus>,
    datasets: Vec<DatasetStatus>,
}

#[derive(Debug, Serialize)]
struct LastRunStatus {
    finished_at: DateTime<Utc>,
    outcome: String,
}

#[derive(Debug, Serialize)]
struct DatasetStatus {
    log_table: String,
    target_table: String,
    enabled: bool,
    skipped_reason: Option<String>,
    watermark: DateTime<Utc>,
    dead_letters: usize,
}

#[derive(Tabled)]
struct DatasetTableRow {
    #[tabled(rename = "dataset")]
    dataset: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "watermark")]
    watermark: String,
    #[tabled(rename = "age")]
    age: String,
    #[tabled(rename = "dead letters")]
    dead_letters: usize,
}

fn build_report(config: &Config) -> Result<StatusReport> {
    let locks = vec![
        lock_status("import", &config.lock_file),
        lock_status("export", &export_lock_path(config)),
    ];
    let mut channels = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        let run_state = state::load_at(&config.state_dir, &channel.name.0)
            .with_context(|| format!("failed to load run state for '{}'", channel.name))?;
        channels.push(channel_status(channel, &run_state)?);
    }
    Ok(StatusReport { locks, channels })
}

fn lock_status(kind: &'static str, path: &Path) -> LockStatus {
    let lock = LockFile::new(path, None);
    let held = lock.exists();
    // An unreadable marker still counts as held.
    let since = lock.held_since().unwrap_or(None);
    LockStatus {
        kind,
        path: path.to_path_buf(),
        held,
        since,
    }
}

fn channel_status(channel: &SyncChannel, run_state: &RunState) -> Result<ChannelStatus> {
    let view = registry::datasets(channel, |table| run_state.watermark(table))
        .with_context(|| format!("invalid datasets in channel '{}'", channel.name))?;

    let dead_letters = |table: &str| {
        run_state
            .datasets
            .get(table)
            .map(|d| d.dead_letters.len())
            .unwrap_or(0)
    };
    let watermark = |table: &str| {
        run_state
            .watermark(table)
            .unwrap_or_else(registry::initial_watermark)
    };

    let mut datasets: Vec<DatasetStatus> = view
        .enabled
        .iter()
        .map(|d| DatasetStatus {
            log_table: d.log_table.clone(),
            target_table: d.target_table.clone(),
            enabled: true,
            skipped_reason: None,
            watermark: d.last_watermark,
            dead_letters: dead_letters(&d.log_table),
        })
        .collect();
    for skipped in &view.skipped {
        let target_table = channel
            .datasets
            .iter()
            .find(|d| d.log_table == skipped.log_table)
            .map(|d| d.target_table.clone())
            .unwrap_or_default();
        datasets.push(DatasetStatus {
            log_table: skipped.log_table.clone(),
            target_table,
            enabled: false,
            skipped_reason: Some(skipped.reason.clone()),
            watermark: watermark(&skipped.log_table),
            dead_letters: dead_letters(&skipped.log_table),
        });
    }

    Ok(ChannelStatus {
        name: channel.name.0.clone(),
        disabled: channel.disabled,
        last_run: run_state.last_run.as_ref().map(|r| LastRunStatus {
            finished_at: r.finished_at,
            outcome: r.outcome.clone(),
        }),
        datasets,
    })
}

fn print_table(report: &StatusReport, now: DateTime<Utc>) {
    let datasets: usize = report.channels.iter().map(|c| c.datasets.len()).sum();
    let dead_letters: usize = report
        .channels
        .iter()
        .flat_map(|c| c.datasets.iter())
        .map(|d| d.dead_letters)
        .sum();
    println!(
        "Ferry v{} | {} channels | {} datasets | {} dead letters",
        env!("CARGO_PKG_VERSION"),
        report.channels.len(),
        datasets,
        dead_letters,
    );

    let separator = "■".repeat(67).bright_black().to_string();
    println!("{separator}");
    for lock in &report.locks {
        let state = match (lock.held, lock.since) {
            (false, _) => "free".green().to_string(),
            (true, Some(since)) => format!(
                "{} since {} ({} ago)",
                "HELD".yellow().bold(),
                since.to_rfc3339(),
                format_age(now, since)
            ),
            (true, None) => format!("{} (unreadable timestamp)", "HELD".yellow().bold()),
        };
        println!("{} lock {}: {state}", lock.kind, lock.path.display());
    }
    println!("{separator}");

    for channel in &report.channels {
        let mut title = channel.name.to_uppercase().bold().to_string();
        if channel.disabled {
            title.push_str(&format!(" {}", "DISABLED".bright_black()));
        }
        println!("{title}");
        match &channel.last_run {
            Some(run) => println!(
                "last run: {} ({} ago)",
                run.outcome,
                format_age(now, run.finished_at)
            ),
            None => println!("last run: never"),
        }

        let rows: Vec<DatasetTableRow> = channel
            .datasets
            .iter()
            .map(|d| DatasetTableRow {
                dataset: format!("{} -> {}", d.log_table, d.target_table),
                status: match &d.skipped_reason {
                    None => "ENABLED".to_string(),
                    Some(reason) => format!("SKIPPED ({reason})"),
                },
                watermark: d.watermark.to_rfc3339(),
                age: format_age(now, d.watermark),
                dead_letters: d.dead_letters,
            })
            .collect();
        if rows.is_empty() {
            println!("No datasets configured.");
        } else {
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
        println!("{separator}");
    }

    if report.locks.iter().any(|l| l.held) {
        println!("Run 'ferry unlock' if no run is in progress.");
    }
}

fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(then).num_seconds().max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ages_use_the_largest_whole_unit() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(format_age(now, now), "0s");
        assert_eq!(format_age(now, now - chrono::Duration::seconds(90)), "1m");
        assert_eq!(format_age(now, now - chrono::Duration::hours(5)), "5h");
        assert_eq!(format_age(now, now - chrono::Duration::days(3)), "3d");
        assert_eq!(format_age(now, now + chrono::Duration::hours(1)), "0s");
    }
}
