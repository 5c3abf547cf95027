//! Typed pipeline configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.ferry/
//!   ferry.yaml      (default location; any path can be passed explicitly)
//! ```
//!
//! # API pattern
//!
//! As in the registry, every loader has two forms:
//! - `fn_at(path: &Path, …)`: explicit location; used in tests with `TempDir`
//! - `fn(…)`: derives the default location from `dirs::home_dir()`
//!
//! A config is validated as part of loading. Nothing downstream ever sees a
//! config with an empty store name or half of an x/y pair.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{BranchName, ChannelName, SpatialFields, StoreName};

// ---------------------------------------------------------------------------
// 1. Schema
// ---------------------------------------------------------------------------

/// Root of `ferry.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Marker file enforcing single-instance runs.
    pub lock_file: PathBuf,
    /// Directory holding per-channel run state (watermarks, dead letters).
    pub state_dir: PathBuf,
    /// Root of the local store backend.
    pub data_dir: PathBuf,
    /// Force-release a lock marker older than this. Absent = manual recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_lock_after_secs: Option<u64>,
    /// End the run after import when no change was applied.
    #[serde(default = "default_true")]
    pub skip_downstream_when_unchanged: bool,
    pub channels: Vec<SyncChannel>,
}

/// A replica definition: datasets that are imported, reconciled and
/// synchronized together. Disabling a channel disables all of its datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncChannel {
    pub name: ChannelName,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_true")]
    pub auto_reconcile: bool,
    #[serde(default = "default_true")]
    pub delete_temp_files: bool,
    /// Where export artifacts are staged before hand-off.
    pub temp_path: PathBuf,
    /// Hand-off directory polled by the downstream consumer.
    pub export_path: PathBuf,
    /// Replica (sync schema) reference used by cross-store sync and export.
    pub replica: String,
    /// Edit branch of the staging store that receives imported changes.
    pub import_branch: BranchName,
    pub staging: StoreConfig,
    pub production: StoreConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// One versioned store and its branch layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub store: StoreName,
    pub baseline: BranchName,
    #[serde(default)]
    pub edit_branches: Vec<BranchName>,
}

/// Static half of a dataset; the registry adds the persisted watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub log_function: String,
    pub log_table: String,
    pub log_primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_field: Option<String>,
    pub target_table: String,
    pub target_primary_key: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn channel(&self, name: &str) -> Result<&SyncChannel, ConfigError> {
        self.channels
            .iter()
            .find(|c| c.name.0 == name)
            .ok_or_else(|| ConfigError::UnknownChannel(name.to_owned()))
    }

    pub fn stale_lock_after(&self) -> Option<Duration> {
        self.stale_lock_after_secs.map(Duration::from_secs)
    }

    /// Check everything serde cannot express. Called by [`load_at`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_path("lock_file", &self.lock_file)?;
        require_path("state_dir", &self.state_dir)?;
        require_path("data_dir", &self.data_dir)?;
        if self.channels.is_empty() {
            return Err(ConfigError::invalid("channels", "at least one channel is required"));
        }

        let mut names = BTreeSet::new();
        for (i, channel) in self.channels.iter().enumerate() {
            let at = format!("channels[{i}]");
            require(&format!("{at}.name"), &channel.name.0)?;
            if !names.insert(channel.name.0.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{at}.name"),
                    format!("duplicate channel '{}'", channel.name),
                ));
            }
            channel.validate(&at)?;
        }
        Ok(())
    }
}

impl SyncChannel {
    fn validate(&self, at: &str) -> Result<(), ConfigError> {
        require(&format!("{at}.replica"), &self.replica)?;
        require(&format!("{at}.import_branch"), &self.import_branch.0)?;
        require_path(&format!("{at}.temp_path"), &self.temp_path)?;
        require_path(&format!("{at}.export_path"), &self.export_path)?;
        self.staging.validate(&format!("{at}.staging"))?;
        self.production.validate(&format!("{at}.production"))?;

        if self.staging.store == self.production.store {
            return Err(ConfigError::invalid(
                format!("{at}.production.store"),
                "staging and production must be different stores",
            ));
        }
        if self.import_branch == self.staging.baseline {
            return Err(ConfigError::invalid(
                format!("{at}.import_branch"),
                "must be an edit branch, not the staging baseline",
            ));
        }

        let mut log_tables = BTreeSet::new();
        for (i, dataset) in self.datasets.iter().enumerate() {
            let dat = format!("{at}.datasets[{i}]");
            dataset.validate(&dat)?;
            if !log_tables.insert(dataset.log_table.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{dat}.log_table"),
                    format!("duplicate log table '{}'", dataset.log_table),
                ));
            }
        }
        Ok(())
    }
}

impl StoreConfig {
    fn validate(&self, at: &str) -> Result<(), ConfigError> {
        require(&format!("{at}.store"), &self.store.0)?;
        require(&format!("{at}.baseline"), &self.baseline.0)?;
        for (i, branch) in self.edit_branches.iter().enumerate() {
            require(&format!("{at}.edit_branches[{i}]"), &branch.0)?;
            if *branch == self.baseline {
                return Err(ConfigError::invalid(
                    format!("{at}.edit_branches[{i}]"),
                    "the baseline cannot be merged into itself",
                ));
            }
        }
        Ok(())
    }
}

impl DatasetConfig {
    fn validate(&self, at: &str) -> Result<(), ConfigError> {
        require(&format!("{at}.log_function"), &self.log_function)?;
        require(&format!("{at}.log_table"), &self.log_table)?;
        require(&format!("{at}.log_primary_key"), &self.log_primary_key)?;
        require(&format!("{at}.target_table"), &self.target_table)?;
        require(&format!("{at}.target_primary_key"), &self.target_primary_key)?;
        self.spatial_fields(at).map(|_| ())
    }

    /// The x/y pair, or `None` for non-spatial datasets. Half a pair is invalid.
    pub fn spatial_fields(&self, at: &str) -> Result<Option<SpatialFields>, ConfigError> {
        match (&self.x_field, &self.y_field) {
            (Some(x), Some(y)) => {
                require(&format!("{at}.x_field"), x)?;
                require(&format!("{at}.y_field"), y)?;
                Ok(Some(SpatialFields {
                    x: x.clone(),
                    y: y.clone(),
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::invalid(
                format!("{at}.x_field"),
                "x_field and y_field must be set together",
            )),
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

fn require_path(field: &str, value: &Path) -> Result<(), ConfigError> {
    if value.as_os_str().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// `<home>/.ferry/ferry.yaml`: pure, no I/O.
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".ferry").join("ferry.yaml")
}

/// `default_path_at` convenience wrapper.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    Ok(default_path_at(&home()?))
}

/// Load and validate a config file.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with
/// path + line context) if malformed, `ConfigError::Invalid` if incomplete.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper for the default location.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&default_path()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> SyncChannel {
        SyncChannel {
            name: ChannelName::from("StagingToProduction"),
            disabled: false,
            auto_reconcile: true,
            delete_temp_files: true,
            temp_path: PathBuf::from("/tmp/ferry/tmp"),
            export_path: PathBuf::from("/tmp/ferry/out"),
            replica: "StagingToProduction".into(),
            import_branch: BranchName::from("BG-BASE"),
            staging: StoreConfig {
                store: StoreName::from("staging"),
                baseline: BranchName::from("DEFAULT"),
                edit_branches: vec![BranchName::from("DESKTOP")],
            },
            production: StoreConfig {
                store: StoreName::from("production"),
                baseline: BranchName::from("DEFAULT"),
                edit_branches: vec![BranchName::from("EDIT")],
            },
            datasets: vec![DatasetConfig {
                log_function: "cdc.fn_cdc_get_all_changes_dbo_PLANTS".into(),
                log_table: "dbo_PLANTS_CT".into(),
                log_primary_key: "rep_id".into(),
                x_field: Some("X_COORD".into()),
                y_field: Some("Y_COORD".into()),
                target_table: "PLANTS".into(),
                target_primary_key: "rep_id".into(),
                disabled: false,
                disabled_reason: None,
            }],
        }
    }

    fn config() -> Config {
        Config {
            lock_file: PathBuf::from("/tmp/ferry/import.lock"),
            state_dir: PathBuf::from("/tmp/ferry/state"),
            data_dir: PathBuf::from("/tmp/ferry/data"),
            stale_lock_after_secs: None,
            skip_downstream_when_unchanged: true,
            channels: vec![channel()],
        }
    }

    #[test]
    fn valid_config_passes() {
        config().validate().expect("valid");
    }

    #[test]
    fn half_spatial_pair_is_rejected() {
        let mut cfg = config();
        cfg.channels[0].datasets[0].y_field = None;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("x_field and y_field"), "got: {err}");
    }

    #[test]
    fn import_branch_cannot_be_baseline() {
        let mut cfg = config();
        cfg.channels[0].import_branch = BranchName::from("DEFAULT");
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field.ends_with("import_branch")));
    }

    #[test]
    fn duplicate_channels_are_rejected() {
        let mut cfg = config();
        cfg.channels.push(channel());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate channel"));
    }

    #[test]
    fn empty_required_string_names_the_field() {
        let mut cfg = config();
        cfg.channels[0].datasets[0].target_primary_key = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("channels[0].datasets[0].target_primary_key"));
    }

    #[test]
    fn unknown_channel_lookup_fails() {
        let cfg = config();
        assert!(cfg.channel("StagingToProduction").is_ok());
        assert!(matches!(
            cfg.channel("nope"),
            Err(ConfigError::UnknownChannel(_))
        ));
    }

    #[test]
    fn default_path_is_under_dot_ferry() {
        let path = default_path_at(Path::new("/home/u"));
        assert!(path.ends_with(".ferry/ferry.yaml"));
    }
}
