//! Dataset registry: joins channel configuration with persisted watermarks.
//!
//! The registry owns no state of its own. Callers pass a lookup for the
//! last applied watermark of each dataset (keyed by log table) and get back
//! the enabled [`Dataset`]s plus the ones skipped and why.

use chrono::{DateTime, TimeZone, Utc};

use crate::config::SyncChannel;
use crate::error::ConfigError;
use crate::types::Dataset;

/// Watermark used for a dataset that has never been applied.
pub fn initial_watermark() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A dataset the registry left out of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDataset {
    pub log_table: String,
    pub reason: String,
}

/// Result of resolving a channel against run state.
#[derive(Debug, Clone, Default)]
pub struct DatasetView {
    pub enabled: Vec<Dataset>,
    pub skipped: Vec<SkippedDataset>,
}

/// Resolve every dataset of `channel`.
///
/// A disabled channel yields no enabled datasets; each of its datasets is
/// reported as skipped with the channel as the reason.
pub fn datasets<F>(channel: &SyncChannel, watermark_of: F) -> Result<DatasetView, ConfigError>
where
    F: Fn(&str) -> Option<DateTime<Utc>>,
{
    let mut view = DatasetView::default();
    for (i, cfg) in channel.datasets.iter().enumerate() {
        if channel.disabled {
            view.skipped.push(SkippedDataset {
                log_table: cfg.log_table.clone(),
                reason: format!("channel '{}' is disabled", channel.name),
            });
            continue;
        }
        if cfg.disabled {
            view.skipped.push(SkippedDataset {
                log_table: cfg.log_table.clone(),
                reason: cfg
                    .disabled_reason
                    .clone()
                    .unwrap_or_else(|| "disabled".to_string()),
            });
            continue;
        }

        let spatial = cfg.spatial_fields(&format!("{}.datasets[{i}]", channel.name))?;
        view.enabled.push(Dataset {
            log_function: cfg.log_function.clone(),
            log_table: cfg.log_table.clone(),
            log_primary_key: cfg.log_primary_key.clone(),
            target_table: cfg.target_table.clone(),
            target_primary_key: cfg.target_primary_key.clone(),
            spatial,
            last_watermark: watermark_of(&cfg.log_table).unwrap_or_else(initial_watermark),
        });
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Duration;

    use super::*;
    use crate::config::{DatasetConfig, StoreConfig};
    use crate::types::{BranchName, ChannelName, StoreName};

    fn dataset(table: &str) -> DatasetConfig {
        DatasetConfig {
            log_function: format!("fn_{table}"),
            log_table: table.into(),
            log_primary_key: "id".into(),
            x_field: None,
            y_field: None,
            target_table: table.to_lowercase(),
            target_primary_key: "id".into(),
            disabled: false,
            disabled_reason: None,
        }
    }

    fn channel(datasets: Vec<DatasetConfig>) -> SyncChannel {
        SyncChannel {
            name: ChannelName::from("c"),
            disabled: false,
            auto_reconcile: true,
            delete_temp_files: true,
            temp_path: PathBuf::from("/tmp"),
            export_path: PathBuf::from("/tmp"),
            replica: "r".into(),
            import_branch: BranchName::from("IMPORT"),
            staging: StoreConfig {
                store: StoreName::from("staging"),
                baseline: BranchName::from("DEFAULT"),
                edit_branches: vec![],
            },
            production: StoreConfig {
                store: StoreName::from("production"),
                baseline: BranchName::from("DEFAULT"),
                edit_branches: vec![],
            },
            datasets,
        }
    }

    #[test]
    fn missing_watermark_defaults_to_initial() {
        let view = datasets(&channel(vec![dataset("A")]), |_| None).expect("view");
        assert_eq!(view.enabled.len(), 1);
        assert_eq!(view.enabled[0].last_watermark, initial_watermark());
    }

    #[test]
    fn persisted_watermark_is_used() {
        let t = initial_watermark() + Duration::days(30);
        let view = datasets(&channel(vec![dataset("A")]), |k| (k == "A").then_some(t))
            .expect("view");
        assert_eq!(view.enabled[0].last_watermark, t);
    }

    #[test]
    fn disabled_dataset_is_skipped_with_reason() {
        let mut d = dataset("B");
        d.disabled = true;
        d.disabled_reason = Some("schema change pending".into());
        let view = datasets(&channel(vec![dataset("A"), d]), |_| None).expect("view");
        assert_eq!(view.enabled.len(), 1);
        assert_eq!(view.skipped[0].log_table, "B");
        assert_eq!(view.skipped[0].reason, "schema change pending");
    }

    #[test]
    fn disabled_channel_disables_every_dataset() {
        let mut c = channel(vec![dataset("A"), dataset("B")]);
        c.disabled = true;
        let view = datasets(&c, |_| None).expect("view");
        assert!(view.enabled.is_empty());
        assert_eq!(view.skipped.len(), 2);
    }
}
