pub mod export;
pub mod import;
pub mod status;
pub mod unlock;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use ferry_core::{config, Config};
use ferry_sync::{RunOutcome, Scope};

/// Load `path`, or the default config when none was given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_at(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let path = config::default_path().context("could not resolve the default config path")?;
            config::load_at(&path).with_context(|| {
                format!(
                    "failed to load config from {} (pass --config to use another file)",
                    path.display()
                )
            })
        }
    }
}

pub fn scope(channel: Option<String>) -> Scope {
    channel.map(Scope::Channel).unwrap_or(Scope::All)
}

/// One-word, colored rendering of a run outcome.
pub fn outcome_label(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed => "COMPLETED".green().bold().to_string(),
        RunOutcome::NoChanges => "NO CHANGES".bright_black().bold().to_string(),
        RunOutcome::Disabled => "DISABLED".bright_black().to_string(),
        RunOutcome::AlreadyRunning { .. } => "ALREADY RUNNING".yellow().bold().to_string(),
        RunOutcome::Aborted { .. } => "ABORTED".red().bold().to_string(),
    }
}
