//! `ferry unlock`: remove a lock marker left behind by a crashed run.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use ferry_sync::export::export_lock_path;
use ferry_sync::lock::LockFile;

use super::load_config;

/// Arguments for `ferry unlock`.
#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Remove the export lock instead of the import lock.
    #[arg(long)]
    pub export: bool,
}

impl UnlockArgs {
    pub fn run(self, config: Option<&Path>) -> Result<()> {
        let config = load_config(config)?;
        let path = if self.export {
            export_lock_path(&config)
        } else {
            config.lock_file.clone()
        };
        let lock = LockFile::new(&path, None);
        let since = lock.held_since().ok().flatten();

        let removed = lock
            .remove()
            .with_context(|| format!("failed to remove lock marker {}", path.display()))?;
        match (removed, since) {
            (true, Some(since)) => println!(
                "✓ removed {} (held since {})",
                path.display(),
                since.to_rfc3339()
            ),
            (true, None) => println!("✓ removed {}", path.display()),
            (false, _) => println!("no lock marker at {}", path.display()),
        }
        tracing::info!(path = %path.display(), removed, "unlock");
        Ok(())
    }
}
