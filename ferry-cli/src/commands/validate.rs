//! `ferry validate`: load and check the config, touch nothing else.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use ferry_core::registry;

use super::load_config;

pub fn run(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;

    let mut enabled = 0;
    for channel in &config.channels {
        let view = registry::datasets(channel, |_| None)
            .with_context(|| format!("invalid datasets in channel '{}'", channel.name))?;
        enabled += view.enabled.len();
        for skipped in &view.skipped {
            println!(
                "  {} {}/{}: {}",
                "skipped".bright_black(),
                channel.name,
                skipped.log_table,
                skipped.reason
            );
        }
        for dataset in channel
            .datasets
            .iter()
            .filter(|d| d.disabled && d.disabled_reason.is_none())
        {
            println!(
                "  {} {}/{} is disabled without a reason",
                "warning:".yellow(),
                channel.name,
                dataset.log_table
            );
        }
    }

    println!(
        "{} config OK: {} channels, {} enabled datasets",
        "✓".green(),
        config.channels.len(),
        enabled
    );
    Ok(())
}
