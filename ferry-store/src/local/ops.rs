use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::{BranchName, Point, Row, StoreName};

use super::store::{branch_not_found, LocalEditor, LocalRow, Tombstone};
use super::{write_json_at, LocalBackend};
use crate::{
    BranchEditor, CompactReport, ExportReport, MergeFavor, MergeReport, StoreError, SyncFavor,
    SyncReport, VersionedStore,
};

/// A data-change message written by [`VersionedStore::export_changes`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub store: String,
    pub replica: String,
    pub generated_at: DateTime<Utc>,
    pub from_state: u64,
    pub to_state: u64,
    pub upserts: Vec<ExportedRow>,
    pub deletes: Vec<ExportedDelete>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRow {
    pub table: String,
    pub global_id: String,
    pub values: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedDelete {
    pub table: String,
    pub global_id: String,
}

impl VersionedStore for LocalBackend {
    fn open_branch<'a>(
        &'a self,
        store: &StoreName,
        branch: &BranchName,
    ) -> Result<Box<dyn BranchEditor + 'a>, StoreError> {
        Ok(Box::new(LocalEditor::open(self, store, branch)?))
    }

    fn merge(
        &self,
        store: &StoreName,
        edit_branches: &[BranchName],
        baseline: &BranchName,
        favor: MergeFavor,
    ) -> Result<MergeReport, StoreError> {
        let mut doc = self.load_store(&store.0)?;
        doc.branch(&store.0, &baseline.0)?;
        let mut report = MergeReport::default();

        for edit in edit_branches {
            if edit == baseline {
                return Err(StoreError::InvalidBranch {
                    store: store.0.clone(),
                    branch: edit.0.clone(),
                    reason: "cannot merge a branch into itself".into(),
                });
            }
            let edited = doc.branch(&store.0, &edit.0)?.clone();
            let since = edited.base_state;
            let mut state = doc.state;

            let base = doc
                .branches
                .get_mut(&baseline.0)
                .ok_or_else(|| branch_not_found(&store.0, &baseline.0))?;

            for (table, rows) in &edited.tables {
                let target = base.tables.entry(table.clone()).or_default();
                for row in rows.values().filter(|r| r.state > since) {
                    let baseline_moved = target.get(&row.object_id).is_some_and(|b| b.state > since)
                        || base
                            .tombstones
                            .iter()
                            .any(|t| t.global_id == row.global_id && t.state > since);
                    if baseline_moved {
                        report.conflicts += 1;
                        if favor == MergeFavor::Baseline {
                            continue;
                        }
                    }
                    state += 1;
                    let mut posted = row.clone();
                    posted.state = state;
                    target.insert(posted.object_id, posted);
                    report.rows_posted += 1;
                }
            }

            for tomb in edited.tombstones.iter().filter(|t| t.state > since) {
                let Some(oid) = base.object_id_of(&tomb.table, &tomb.global_id) else {
                    continue;
                };
                let rows = base.tables.entry(tomb.table.clone()).or_default();
                if rows.get(&oid).is_some_and(|b| b.state > since) {
                    report.conflicts += 1;
                    if favor == MergeFavor::Baseline {
                        continue;
                    }
                }
                rows.remove(&oid);
                state += 1;
                base.tombstones.push(Tombstone {
                    table: tomb.table.clone(),
                    global_id: tomb.global_id.clone(),
                    state,
                });
                report.rows_posted += 1;
            }

            let rebased = super::store::BranchDoc {
                base_state: state,
                tables: base.tables.clone(),
                tombstones: Vec::new(),
            };
            doc.branches.insert(edit.0.clone(), rebased);
            doc.state = state;
            report.branches += 1;
        }

        self.save_store(&store.0, &doc)?;
        tracing::debug!(store = %store, ?favor, ?report, "merged edit branches");
        Ok(report)
    }

    fn sync(
        &self,
        source: &StoreName,
        replica: &str,
        destination: &StoreName,
        favor: SyncFavor,
    ) -> Result<SyncReport, StoreError> {
        if source == destination {
            return Err(StoreError::SameStore(source.0.clone()));
        }
        let mut src = self.load_store(&source.0)?;
        let mut dst = self.load_store(&destination.0)?;

        let sent = src.replicas.get(replica).and_then(|c| c.sent).unwrap_or(0);
        let received = dst.replicas.get(replica).map(|c| c.received).unwrap_or(0);
        let src_base = src.branch(&source.0, &src.baseline)?.clone();

        // Every table with outgoing changes must exist at the destination.
        let changed_tables: BTreeSet<&String> = src_base
            .tables
            .iter()
            .filter(|(_, rows)| rows.values().any(|r| r.state > sent))
            .map(|(t, _)| t)
            .chain(
                src_base
                    .tombstones
                    .iter()
                    .filter(|t| t.state > sent)
                    .map(|t| &t.table),
            )
            .collect();
        for table in &changed_tables {
            dst.fields(&destination.0, table)?;
        }

        let mut report = SyncReport::default();
        let mut state = dst.state;
        let mut next_oid = dst.next_object_id;
        let schema = dst.schema.clone();
        let dst_baseline = dst.baseline.clone();
        let base = dst
            .branches
            .get_mut(&dst_baseline)
            .ok_or_else(|| branch_not_found(&destination.0, &dst_baseline))?;

        for (table, rows) in &src_base.tables {
            let fields = schema.get(table).cloned().unwrap_or_default();
            for row in rows.values().filter(|r| r.state > sent) {
                let values: Row = row
                    .values
                    .iter()
                    .filter(|(k, _)| fields.contains(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let existing = base.object_id_of(table, &row.global_id);
                let target = base.tables.entry(table.clone()).or_default();
                match existing {
                    Some(oid) => {
                        if target.get(&oid).is_some_and(|d| d.state > received) {
                            report.conflicts += 1;
                            if favor == SyncFavor::Destination {
                                continue;
                            }
                        }
                        state += 1;
                        if let Some(d) = target.get_mut(&oid) {
                            d.values = values;
                            d.shape = row.shape;
                            d.state = state;
                        }
                    }
                    None => {
                        state += 1;
                        next_oid += 1;
                        target.insert(
                            next_oid,
                            LocalRow {
                                object_id: next_oid,
                                global_id: row.global_id.clone(),
                                state,
                                values,
                                shape: row.shape,
                            },
                        );
                    }
                }
                report.upserted += 1;
            }
        }

        for tomb in src_base.tombstones.iter().filter(|t| t.state > sent) {
            let Some(oid) = base.object_id_of(&tomb.table, &tomb.global_id) else {
                continue;
            };
            let rows = base.tables.entry(tomb.table.clone()).or_default();
            if rows.get(&oid).is_some_and(|d| d.state > received) {
                report.conflicts += 1;
                if favor == SyncFavor::Destination {
                    continue;
                }
            }
            rows.remove(&oid);
            state += 1;
            base.tombstones.push(Tombstone {
                table: tomb.table.clone(),
                global_id: tomb.global_id.clone(),
                state,
            });
            report.deleted += 1;
        }

        dst.state = state;
        dst.next_object_id = next_oid;
        dst.replicas.entry(replica.to_string()).or_default().received = state;
        src.replicas.entry(replica.to_string()).or_default().sent = Some(src.state);

        // Destination first: a crash in between only re-sends idempotent upserts.
        self.save_store(&destination.0, &dst)?;
        self.save_store(&source.0, &src)?;
        tracing::debug!(
            source = %source,
            destination = %destination,
            replica,
            ?report,
            "synchronized replica"
        );
        Ok(report)
    }

    fn compact(&self, store: &StoreName) -> Result<CompactReport, StoreError> {
        let mut doc = self.load_store(&store.0)?;
        let floor = doc
            .branches
            .iter()
            .filter(|(name, _)| **name != doc.baseline)
            .map(|(_, b)| b.base_state)
            .chain(doc.replicas.values().flat_map(|c| c.sent.into_iter().chain(c.exported)))
            .min()
            .unwrap_or(doc.state);

        let mut report = CompactReport::default();
        for branch in doc.branches.values_mut() {
            let before = branch.tombstones.len();
            branch.tombstones.retain(|t| t.state > floor);
            report.tombstones_removed += before - branch.tombstones.len();
        }
        self.save_store(&store.0, &doc)?;
        tracing::debug!(store = %store, floor, removed = report.tombstones_removed, "compacted");
        Ok(report)
    }

    fn export_changes(
        &self,
        store: &StoreName,
        replica: &str,
        artifact: &Path,
    ) -> Result<ExportReport, StoreError> {
        let mut doc = self.load_store(&store.0)?;
        let from = doc.replicas.get(replica).and_then(|c| c.exported).unwrap_or(0);
        let base = doc.branch(&store.0, &doc.baseline)?;

        let upserts: Vec<ExportedRow> = base
            .tables
            .iter()
            .flat_map(|(table, rows)| {
                rows.values()
                    .filter(move |r| r.state > from)
                    .map(move |r| ExportedRow {
                        table: table.clone(),
                        global_id: r.global_id.clone(),
                        values: r.values.clone(),
                        shape: r.shape,
                    })
            })
            .collect();
        let deletes: Vec<ExportedDelete> = base
            .tombstones
            .iter()
            .filter(|t| t.state > from)
            .map(|t| ExportedDelete {
                table: t.table.clone(),
                global_id: t.global_id.clone(),
            })
            .collect();

        let message = ChangeMessage {
            store: store.0.clone(),
            replica: replica.to_string(),
            generated_at: Utc::now(),
            from_state: from,
            to_state: doc.state,
            upserts,
            deletes,
        };
        write_json_at(artifact, &message)?;

        let report = ExportReport {
            upserts: message.upserts.len(),
            deletes: message.deletes.len(),
        };
        doc.replicas.entry(replica.to_string()).or_default().exported = Some(doc.state);
        self.save_store(&store.0, &doc)?;
        Ok(report)
    }
}
