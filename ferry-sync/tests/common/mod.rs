#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use ferry_core::{
    BranchName, ChangeRecord, ChannelName, Config, DatasetConfig, Row, RowImage, SequenceKey,
    StoreConfig, StoreName, SyncChannel, Value,
};
use ferry_store::{
    BranchEditor, ChangeLog, CompactReport, ExportReport, LocalBackend, MergeFavor, MergeReport,
    SequenceBound, StoreError, SyncFavor, SyncReport, TargetStore, VersionedStore,
};
use ferry_sync::{FixedClock, PipelineContext};
use tempfile::TempDir;

pub const CHANNEL: &str = "StagingToProduction";
pub const LOG_FN: &str = "cdc.fn_plants";
pub const LOG_TABLE: &str = "dbo_PLANTS_CT";
pub const TABLE: &str = "PLANTS";
pub const KEY: &str = "rep_id";

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
}

pub fn store(name: &str) -> StoreName {
    StoreName::from(name)
}

pub fn branch(name: &str) -> BranchName {
    BranchName::from(name)
}

/// A `LocalBackend` that records every call and can be told to fail.
pub struct Recording<'a> {
    pub inner: &'a LocalBackend,
    pub calls: RefCell<Vec<String>>,
    pub log_down: Cell<bool>,
    pub prune_down: Cell<bool>,
    pub target_down: Cell<bool>,
    pub merge_down: Cell<bool>,
    pub sync_down: Cell<bool>,
    pub compact_down: Cell<bool>,
}

fn down(what: &str) -> StoreError {
    StoreError::Unavailable {
        target: what.to_string(),
        reason: "injected failure".to_string(),
    }
}

impl<'a> Recording<'a> {
    pub fn new(inner: &'a LocalBackend) -> Self {
        Self {
            inner,
            calls: RefCell::new(Vec::new()),
            log_down: Cell::new(false),
            prune_down: Cell::new(false),
            target_down: Cell::new(false),
            merge_down: Cell::new(false),
            sync_down: Cell::new(false),
            compact_down: Cell::new(false),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl ChangeLog for Recording<'_> {
    fn map_time_to_sequence(
        &self,
        log_function: &str,
        at: DateTime<Utc>,
        bound: SequenceBound,
    ) -> Result<Option<SequenceKey>, StoreError> {
        self.record(format!("map_time {log_function}"));
        if self.log_down.get() {
            return Err(down(log_function));
        }
        self.inner.map_time_to_sequence(log_function, at, bound)
    }

    fn changes(
        &self,
        log_function: &str,
        from: &SequenceKey,
        to: &SequenceKey,
    ) -> Result<Vec<ChangeRecord>, StoreError> {
        self.record(format!("changes {log_function}"));
        if self.log_down.get() {
            return Err(down(log_function));
        }
        self.inner.changes(log_function, from, to)
    }

    fn delete_change_records(
        &self,
        log_table: &str,
        keys: &BTreeSet<SequenceKey>,
    ) -> Result<usize, StoreError> {
        self.record(format!("delete_records {log_table}"));
        if self.prune_down.get() {
            return Err(down(log_table));
        }
        self.inner.delete_change_records(log_table, keys)
    }
}

impl VersionedStore for Recording<'_> {
    fn open_branch<'b>(
        &'b self,
        store: &StoreName,
        branch: &BranchName,
    ) -> Result<Box<dyn BranchEditor + 'b>, StoreError> {
        self.record(format!("open_branch {store}/{branch}"));
        if self.target_down.get() {
            return Err(down(&store.0));
        }
        self.inner.open_branch(store, branch)
    }

    fn merge(
        &self,
        store: &StoreName,
        edit_branches: &[BranchName],
        baseline: &BranchName,
        favor: MergeFavor,
    ) -> Result<MergeReport, StoreError> {
        self.record(format!("merge {store}"));
        if self.merge_down.get() {
            return Err(down(&store.0));
        }
        self.inner.merge(store, edit_branches, baseline, favor)
    }

    fn sync(
        &self,
        source: &StoreName,
        replica: &str,
        destination: &StoreName,
        favor: SyncFavor,
    ) -> Result<SyncReport, StoreError> {
        self.record(format!("sync {source}->{destination}"));
        if self.sync_down.get() {
            return Err(down(&destination.0));
        }
        self.inner.sync(source, replica, destination, favor)
    }

    fn compact(&self, store: &StoreName) -> Result<CompactReport, StoreError> {
        self.record(format!("compact {store}"));
        if self.compact_down.get() {
            return Err(down(&store.0));
        }
        self.inner.compact(store)
    }

    fn export_changes(
        &self,
        store: &StoreName,
        replica: &str,
        artifact: &Path,
    ) -> Result<ExportReport, StoreError> {
        self.record(format!("export {store}"));
        self.inner.export_changes(store, replica, artifact)
    }
}

/// A temp directory holding config paths, a local backend with a staging
/// and a production store, and one registered change log.
pub struct Fixture {
    pub tmp: TempDir,
    pub backend: LocalBackend,
    pub config: Config,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let config = Config {
            lock_file: root.join("run").join("import.lock"),
            state_dir: root.join("state"),
            data_dir: root.join("data"),
            stale_lock_after_secs: None,
            skip_downstream_when_unchanged: true,
            channels: vec![channel(root)],
        };
        config.validate().unwrap();

        let backend = LocalBackend::new(&config.data_dir);
        let fields = &[KEY, "NAME", "X_COORD", "Y_COORD"][..];
        for name in ["staging", "production"] {
            backend
                .create_store(&store(name), &branch("DEFAULT"), &[(TABLE, fields)])
                .unwrap();
            backend.create_branch(&store(name), &branch("EDIT")).unwrap();
        }
        backend
            .create_branch(&store("staging"), &branch("BG-BASE"))
            .unwrap();
        backend.create_log(LOG_FN, LOG_TABLE).unwrap();

        Self {
            tmp,
            backend,
            config,
        }
    }

    pub fn channel_mut(&mut self) -> &mut SyncChannel {
        &mut self.config.channels[0]
    }

    /// Append one change to the log.
    pub fn change(&self, op: i32, id: i64, name: &str, when: DateTime<Utc>) -> SequenceKey {
        let mut row = Row::new();
        row.insert(KEY.into(), Value::Int(id));
        row.insert("NAME".into(), Value::Text(name.into()));
        row.insert("X_COORD".into(), Value::Float(10.5));
        row.insert("Y_COORD".into(), Value::Float(-3.25));
        self.backend.append_change(LOG_TABLE, op, row, when).unwrap()
    }

    /// Write rows straight into `store`/`branch`, bypassing the pipeline.
    pub fn seed(&self, s: &str, b: &str, rows: &[(i64, &str)]) {
        let mut editor = self.backend.open_branch(&store(s), &branch(b)).unwrap();
        for (id, name) in rows {
            let mut values = Row::new();
            values.insert(KEY.into(), Value::Int(*id));
            values.insert("NAME".into(), Value::Text((*name).into()));
            editor
                .insert(TABLE, &RowImage { values, shape: None })
                .unwrap();
        }
        editor.commit().unwrap();
    }

    /// Delete rows straight from `store`/`branch`.
    pub fn unseed(&self, s: &str, b: &str, id: i64) {
        let mut editor = self.backend.open_branch(&store(s), &branch(b)).unwrap();
        editor.delete_where(TABLE, KEY, &Value::Int(id)).unwrap();
        editor.commit().unwrap();
    }

    pub fn log_len(&self) -> usize {
        self.backend.log_entries(LOG_TABLE).unwrap().len()
    }

    /// `rep_id -> NAME` for every row of the table on `store`/`branch`.
    pub fn names(&self, s: &str, b: &str) -> Vec<(i64, String)> {
        let mut out: Vec<(i64, String)> = self
            .backend
            .rows(&store(s), &branch(b), TABLE)
            .unwrap()
            .into_iter()
            .map(|r| {
                let id = match r.values.get(KEY) {
                    Some(Value::Int(i)) => *i,
                    other => panic!("unexpected key {other:?}"),
                };
                let name = match r.values.get("NAME") {
                    Some(Value::Text(n)) => n.clone(),
                    other => panic!("unexpected name {other:?}"),
                };
                (id, name)
            })
            .collect();
        out.sort();
        out
    }

    pub fn ctx<'a>(
        &'a self,
        rec: &'a Recording<'a>,
        clock: &'a FixedClock,
    ) -> PipelineContext<'a> {
        PipelineContext::new(&self.config, rec, rec, clock)
    }
}

fn channel(root: &Path) -> SyncChannel {
    SyncChannel {
        name: ChannelName::from(CHANNEL),
        disabled: false,
        auto_reconcile: true,
        delete_temp_files: true,
        temp_path: root.join("tmp"),
        export_path: root.join("handoff"),
        replica: CHANNEL.to_string(),
        import_branch: branch("BG-BASE"),
        staging: StoreConfig {
            store: store("staging"),
            baseline: branch("DEFAULT"),
            edit_branches: vec![branch("EDIT")],
        },
        production: StoreConfig {
            store: store("production"),
            baseline: branch("DEFAULT"),
            edit_branches: vec![branch("EDIT")],
        },
        datasets: vec![DatasetConfig {
            log_function: LOG_FN.to_string(),
            log_table: LOG_TABLE.to_string(),
            log_primary_key: KEY.to_string(),
            x_field: Some("X_COORD".to_string()),
            y_field: Some("Y_COORD".to_string()),
            target_table: TABLE.to_string(),
            target_primary_key: KEY.to_string(),
            disabled: false,
            disabled_reason: None,
        }],
    }
}
