mod common;

use common::{at, Fixture, Recording};
use ferry_store::local::ChangeMessage;
use ferry_sync::export::export_lock_path;
use ferry_sync::{run_export, ExportSummary, FixedClock, RunOutcome, Scope, Stage};

fn export(fx: &Fixture, rec: &Recording<'_>, now: chrono::DateTime<chrono::Utc>) -> ExportSummary {
    let clock = FixedClock(now);
    run_export(&fx.ctx(rec, &clock), Scope::All).unwrap()
}

fn message(path: &std::path::Path) -> ChangeMessage {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn production_edits_reach_staging_and_the_handoff_directory() {
    let fx = Fixture::new();
    fx.seed("production", "EDIT", &[(5, "maple")]);
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    let run = &summary.channels[0];
    assert_eq!(run.outcome, RunOutcome::Completed);
    assert!(run.warnings.is_empty(), "{:?}", run.warnings);
    assert_eq!(run.exported.map(|e| e.upserts), Some(1));

    let receipt = run.handoff.as_ref().expect("handed off");
    let dest = fx.tmp.path().join("handoff").join("changes_20240601120000.json");
    assert_eq!(receipt.destination, dest);
    let msg = message(&dest);
    assert_eq!(msg.upserts.len(), 1);
    assert_eq!(
        msg.upserts[0].values.get("NAME"),
        Some(&ferry_core::Value::Text("maple".into()))
    );

    // Temp artifact removed after a verified hand-off.
    assert!(run.artifact.is_none());
    assert!(!fx.tmp.path().join("tmp").join("temp_20240601120000.json").exists());

    assert_eq!(fx.names("staging", "DEFAULT"), vec![(5, "maple".to_string())]);
    assert_eq!(fx.names("staging", "EDIT"), vec![(5, "maple".to_string())]);
    assert!(!export_lock_path(&fx.config).exists());
}

#[test]
fn second_export_carries_only_new_changes() {
    let fx = Fixture::new();
    fx.seed("production", "EDIT", &[(5, "maple")]);
    let rec = Recording::new(&fx.backend);
    export(&fx, &rec, at(12, 0));

    let summary = export(&fx, &rec, at(13, 0));

    let run = &summary.channels[0];
    assert_eq!(run.exported.map(|e| e.upserts), Some(0));
    let msg = message(&fx.tmp.path().join("handoff").join("changes_20240601130000.json"));
    assert!(msg.upserts.is_empty());
    assert!(msg.deletes.is_empty());
}

#[test]
fn edits_wait_when_auto_reconcile_is_off() {
    let mut fx = Fixture::new();
    fx.channel_mut().auto_reconcile = false;
    fx.seed("production", "EDIT", &[(5, "maple")]);
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    assert_eq!(summary.channels[0].exported.map(|e| e.upserts), Some(0));
    assert_eq!(rec.count("merge production"), 0);
    assert!(fx.names("staging", "DEFAULT").is_empty());
}

#[test]
fn temp_artifact_is_kept_on_request() {
    let mut fx = Fixture::new();
    fx.channel_mut().delete_temp_files = false;
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    let artifact = summary.channels[0].artifact.clone().expect("artifact kept");
    assert!(artifact.exists());
    assert_eq!(artifact.file_name().unwrap(), "temp_20240601120000.json");
}

#[test]
fn held_export_lock_means_no_store_calls() {
    let fx = Fixture::new();
    let lock = export_lock_path(&fx.config);
    std::fs::create_dir_all(lock.parent().unwrap()).unwrap();
    std::fs::write(&lock, at(11, 0).to_rfc3339()).unwrap();
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    assert!(matches!(
        summary.already_running,
        Some(RunOutcome::AlreadyRunning { .. })
    ));
    assert!(rec.calls().is_empty());
}

#[test]
fn import_lock_does_not_block_export() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.config.lock_file.parent().unwrap()).unwrap();
    std::fs::write(&fx.config.lock_file, at(11, 0).to_rfc3339()).unwrap();
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    assert!(summary.already_running.is_none());
    assert_eq!(summary.channels[0].outcome, RunOutcome::Completed);
    assert!(fx.config.lock_file.exists());
}

#[test]
fn merge_failures_are_warnings() {
    let fx = Fixture::new();
    let rec = Recording::new(&fx.backend);
    rec.merge_down.set(true);

    let summary = export(&fx, &rec, at(12, 0));

    let run = &summary.channels[0];
    assert_eq!(run.outcome, RunOutcome::Completed);
    assert_eq!(run.warnings.len(), 2, "{:?}", run.warnings);
    assert_eq!(rec.count("export"), 1);
    assert!(run.handoff.is_some());
}

#[test]
fn sync_failure_aborts_before_handoff() {
    let fx = Fixture::new();
    let rec = Recording::new(&fx.backend);
    rec.sync_down.set(true);

    let summary = export(&fx, &rec, at(12, 0));

    let run = &summary.channels[0];
    assert!(matches!(
        run.outcome,
        RunOutcome::Aborted {
            stage: Stage::Sync,
            ..
        }
    ));
    assert!(summary.is_failure());
    assert!(run.handoff.is_none());
    assert_eq!(rec.count("compact"), 0);
    let artifact = run.artifact.clone().expect("artifact written");
    assert!(artifact.exists());
    assert!(!export_lock_path(&fx.config).exists());
}

#[test]
fn handoff_failure_keeps_the_artifact() {
    let mut fx = Fixture::new();
    let blocker = fx.tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    fx.channel_mut().export_path = blocker;
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    let run = &summary.channels[0];
    assert_eq!(run.outcome, RunOutcome::Completed);
    assert!(run.handoff.is_none());
    assert_eq!(run.warnings.len(), 1);
    assert!(run.warnings[0].starts_with("handoff"));
    assert!(run.artifact.as_ref().is_some_and(|a| a.exists()));
}

#[test]
fn disabled_channel_is_not_exported() {
    let mut fx = Fixture::new();
    fx.channel_mut().disabled = true;
    let rec = Recording::new(&fx.backend);

    let summary = export(&fx, &rec, at(12, 0));

    assert_eq!(summary.channels[0].outcome, RunOutcome::Disabled);
    assert!(rec.calls().is_empty());
}
