//! Config load error-message and validation integration tests.
//! Files live at an explicit path under a `TempDir`; the `~/.ferry` wrapper is never used.

use assert_fs::prelude::*;
use ferry_core::{
    config::{self, Config},
    registry, ConfigError,
};
use predicates::prelude::predicate;
use rstest::rstest;

const VALID: &str = r#"
lock_file: /var/lib/ferry/import.lock
state_dir: /var/lib/ferry/state
data_dir: /var/lib/ferry/data
stale_lock_after_secs: 7200
channels:
  - name: StagingToProduction
    temp_path: /var/lib/ferry/tmp
    export_path: /srv/handoff
    replica: StagingToProduction
    import_branch: BG-BASE
    staging:    { store: staging,    baseline: DEFAULT, edit_branches: [DESKTOP, MOBILE] }
    production: { store: production, baseline: DEFAULT, edit_branches: [EDIT] }
    datasets:
      - log_function: cdc.fn_cdc_get_all_changes_dbo_PLANTS_LOCATION
        log_table: dbo_PLANTS_LOCATION_CT
        log_primary_key: rep_id
        x_field: X_COORD
        y_field: Y_COORD
        target_table: PLANTS_LOCATION
        target_primary_key: rep_id
      - log_function: cdc.fn_cdc_get_all_changes_dbo_NAMES
        log_table: dbo_NAMES_CT
        log_primary_key: name_id
        target_table: NAMES
        target_primary_key: name_id
        disabled: true
        disabled_reason: awaiting schema migration
"#;

fn write_config(dir: &assert_fs::TempDir, body: &str) -> std::path::PathBuf {
    let file = dir.child("ferry.yaml");
    file.write_str(body).expect("write config");
    file.path().to_path_buf()
}

// ---------------------------------------------------------------------------
// 1. Happy path
// ---------------------------------------------------------------------------

#[test]
fn load_valid_config_applies_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = write_config(&dir, VALID);

    let cfg: Config = config::load_at(&path).expect("load");
    let channel = &cfg.channels[0];
    assert!(cfg.skip_downstream_when_unchanged, "defaults to true");
    assert!(channel.auto_reconcile && channel.delete_temp_files && !channel.disabled);
    assert_eq!(channel.staging.edit_branches.len(), 2);
    assert_eq!(cfg.stale_lock_after().map(|d| d.as_secs()), Some(7200));
}

#[test]
fn registry_view_of_loaded_config_skips_disabled_dataset() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let cfg = config::load_at(&write_config(&dir, VALID)).expect("load");

    let view = registry::datasets(&cfg.channels[0], |_| None).expect("view");
    assert_eq!(view.enabled.len(), 1);
    let plants = &view.enabled[0];
    assert_eq!(plants.to_string(), "dbo_PLANTS_LOCATION_CT->PLANTS_LOCATION");
    assert_eq!(plants.spatial.as_ref().map(|s| s.x.as_str()), Some("X_COORD"));
    assert_eq!(view.skipped[0].reason, "awaiting schema migration");
}

// ---------------------------------------------------------------------------
// 2. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.child("absent.yaml");
    path.assert(predicate::path::missing());

    let err = config::load_at(path.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = write_config(&dir, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("ferry.yaml"));
}

#[test]
fn unknown_key_is_a_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let body = VALID.replace("stale_lock_after_secs", "stale_lock_after_minutes");
    let err = config::load_at(&write_config(&dir, &body)).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Validation fails fast
// ---------------------------------------------------------------------------

#[rstest]
#[case::missing_lock_file("lock_file: /var/lib/ferry/import.lock\n", "", "lock_file")]
#[case::empty_replica("replica: StagingToProduction", "replica: \"\"", "replica")]
#[case::same_store("store: production", "store: staging", "production.store")]
#[case::empty_branch("edit_branches: [EDIT]", "edit_branches: [\"\"]", "edit_branches[0]")]
fn invalid_configs_name_the_offending_field(
    #[case] from: &str,
    #[case] to: &str,
    #[case] field: &str,
) {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let body = VALID.replacen(from, to, 1);
    assert_ne!(body, VALID, "fixture replacement must apply");

    let err = config::load_at(&write_config(&dir, &body)).unwrap_err();
    assert!(err.to_string().contains(field), "expected '{field}' in: {err}");
}

#[test]
fn config_without_channels_is_invalid() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let body = "lock_file: /l\nstate_dir: /s\ndata_dir: /d\nchannels: []\n";
    let err = config::load_at(&write_config(&dir, body)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "got: {err}");
}
