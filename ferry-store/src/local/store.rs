use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ferry_core::{BranchName, Point, Row, RowImage, StoreName, Value};

use super::{read_json_at, write_json_at, LocalBackend};
use crate::{BranchEditor, EditSummary, MatchScope, StoreError, TargetStore, GLOBAL_ID_FIELD};

/// Column names a table schema may never declare; the backend owns them.
const SYSTEM_FIELDS: [&str; 3] = ["OBJECTID", "Shape", GLOBAL_ID_FIELD];

/// A row as stored on one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRow {
    pub object_id: u64,
    pub global_id: String,
    /// Store state at which this version was written.
    pub state: u64,
    pub values: Row,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Point>,
}

impl LocalRow {
    pub(super) fn matches(&self, key_field: &str, key: &Value) -> bool {
        if key_field == GLOBAL_ID_FIELD {
            return Value::Text(self.global_id.clone()).key_eq(key);
        }
        self.values.get(key_field).is_some_and(|v| v.key_eq(key))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct Tombstone {
    pub table: String,
    pub global_id: String,
    pub state: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct BranchDoc {
    /// Store state this branch was last rebased on.
    pub base_state: u64,
    #[serde(default)]
    pub tables: BTreeMap<String, BTreeMap<u64, LocalRow>>,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

impl BranchDoc {
    pub(super) fn object_id_of(&self, table: &str, global_id: &str) -> Option<u64> {
        self.tables
            .get(table)?
            .values()
            .find(|r| r.global_id == global_id)
            .map(|r| r.object_id)
    }
}

/// How far a named replica has progressed, in store states.
///
/// `sent` and `exported` stay `None` until this store has acted as a sync
/// source or written a change message for the replica; only set fields hold
/// back compaction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(super) struct ReplicaCursor {
    /// Last source state pushed out through `sync`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<u64>,
    /// Destination state reached by the last inbound `sync`.
    #[serde(default)]
    pub received: u64,
    /// Last state written to a change message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct StoreDoc {
    pub state: u64,
    pub next_object_id: u64,
    pub baseline: String,
    pub schema: BTreeMap<String, Vec<String>>,
    pub branches: BTreeMap<String, BranchDoc>,
    #[serde(default)]
    pub replicas: BTreeMap<String, ReplicaCursor>,
}

impl StoreDoc {
    pub(super) fn branch(&self, store: &str, branch: &str) -> Result<&BranchDoc, StoreError> {
        self.branches
            .get(branch)
            .ok_or_else(|| branch_not_found(store, branch))
    }

    pub(super) fn fields(&self, store: &str, table: &str) -> Result<&[String], StoreError> {
        self.schema
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| StoreError::TableNotFound {
                store: store.to_string(),
                table: table.to_string(),
            })
    }
}

pub(super) fn branch_not_found(store: &str, branch: &str) -> StoreError {
    StoreError::BranchNotFound {
        store: store.to_string(),
        branch: branch.to_string(),
    }
}

impl LocalBackend {
    /// Create an empty store with a baseline branch and the given table
    /// schemas. System fields in a schema are dropped.
    pub fn create_store(
        &self,
        store: &StoreName,
        baseline: &BranchName,
        tables: &[(&str, &[&str])],
    ) -> Result<(), StoreError> {
        let path = self.store_path(&store.0);
        if path.exists() {
            return Err(StoreError::StoreExists {
                store: store.0.clone(),
            });
        }
        let schema = tables
            .iter()
            .map(|(table, fields)| {
                let fields = fields
                    .iter()
                    .filter(|f| !SYSTEM_FIELDS.contains(*f))
                    .map(|f| f.to_string())
                    .collect();
                (table.to_string(), fields)
            })
            .collect();
        let mut doc = StoreDoc {
            baseline: baseline.0.clone(),
            schema,
            ..StoreDoc::default()
        };
        doc.branches.insert(baseline.0.clone(), BranchDoc::default());
        write_json_at(&path, &doc)
    }

    /// Create `branch` as a copy of the store's current baseline.
    pub fn create_branch(&self, store: &StoreName, branch: &BranchName) -> Result<(), StoreError> {
        let mut doc = self.load_store(&store.0)?;
        if doc.branches.contains_key(&branch.0) {
            return Err(StoreError::InvalidBranch {
                store: store.0.clone(),
                branch: branch.0.clone(),
                reason: "already exists".into(),
            });
        }
        let base = doc.branch(&store.0, &doc.baseline)?;
        let copy = BranchDoc {
            base_state: doc.state,
            tables: base.tables.clone(),
            tombstones: Vec::new(),
        };
        doc.branches.insert(branch.0.clone(), copy);
        self.save_store(&store.0, &doc)
    }

    /// All rows of `table` as seen on `branch`, in object-id order.
    pub fn rows(
        &self,
        store: &StoreName,
        branch: &BranchName,
        table: &str,
    ) -> Result<Vec<LocalRow>, StoreError> {
        let doc = self.load_store(&store.0)?;
        doc.fields(&store.0, table)?;
        let rows = doc
            .branch(&store.0, &branch.0)?
            .tables
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        Ok(rows)
    }

    pub(super) fn load_store(&self, store: &str) -> Result<StoreDoc, StoreError> {
        read_json_at(&self.store_path(store))?.ok_or_else(|| StoreError::StoreNotFound {
            store: store.to_string(),
        })
    }

    pub(super) fn save_store(&self, store: &str, doc: &StoreDoc) -> Result<(), StoreError> {
        write_json_at(&self.store_path(store), doc)
    }
}

/// Edit session over one branch. Works on a private copy of the store
/// document; `commit` writes it back in one atomic replace.
pub(super) struct LocalEditor<'a> {
    backend: &'a LocalBackend,
    store: String,
    branch: String,
    doc: StoreDoc,
    summary: EditSummary,
}

impl<'a> LocalEditor<'a> {
    pub(super) fn open(
        backend: &'a LocalBackend,
        store: &StoreName,
        branch: &BranchName,
    ) -> Result<Self, StoreError> {
        let doc = backend.load_store(&store.0)?;
        doc.branch(&store.0, &branch.0)?;
        Ok(Self {
            backend,
            store: store.0.clone(),
            branch: branch.0.clone(),
            doc,
            summary: EditSummary::default(),
        })
    }

    fn check_fields(&self, table: &str, row: &RowImage) -> Result<(), StoreError> {
        let fields = self.doc.fields(&self.store, table)?;
        for name in row.values.keys() {
            if name != GLOBAL_ID_FIELD && !fields.contains(name) {
                return Err(StoreError::UnknownField {
                    table: table.to_string(),
                    field: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn matching(&self, table: &str, key_field: &str, key: &Value) -> Result<Vec<u64>, StoreError> {
        self.doc.fields(&self.store, table)?;
        let branch = self.doc.branch(&self.store, &self.branch)?;
        Ok(branch
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| r.matches(key_field, key))
                    .map(|r| r.object_id)
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl TargetStore for LocalEditor<'_> {
    fn list_fields(&self, table: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.doc.fields(&self.store, table)?.to_vec())
    }

    fn count_where(
        &self,
        table: &str,
        key_field: &str,
        key: &Value,
    ) -> Result<usize, StoreError> {
        Ok(self.matching(table, key_field, key)?.len())
    }

    fn insert(&mut self, table: &str, row: &RowImage) -> Result<(), StoreError> {
        self.check_fields(table, row)?;
        let global_id = match row.values.get(GLOBAL_ID_FIELD) {
            Some(Value::Text(gid)) if !gid.is_empty() => gid.clone(),
            _ => format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase()),
        };
        let mut values = row.values.clone();
        values.remove(GLOBAL_ID_FIELD);

        let doc = &mut self.doc;
        doc.state += 1;
        doc.next_object_id += 1;
        let stored = LocalRow {
            object_id: doc.next_object_id,
            global_id,
            state: doc.state,
            values,
            shape: row.shape,
        };
        let branch = doc
            .branches
            .get_mut(&self.branch)
            .ok_or_else(|| branch_not_found(&self.store, &self.branch))?;
        branch
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(stored.object_id, stored);
        self.summary.inserted += 1;
        Ok(())
    }

    fn update_where(
        &mut self,
        table: &str,
        key_field: &str,
        key: &Value,
        row: &RowImage,
        scope: MatchScope,
    ) -> Result<usize, StoreError> {
        self.check_fields(table, row)?;
        let matched = self.matching(table, key_field, key)?;
        let touched = match scope {
            MatchScope::All => matched.len(),
            MatchScope::First => matched.len().min(1),
        };

        let doc = &mut self.doc;
        let branch = doc
            .branches
            .get_mut(&self.branch)
            .ok_or_else(|| branch_not_found(&self.store, &self.branch))?;
        let rows = branch.tables.entry(table.to_string()).or_default();
        for oid in &matched[..touched] {
            let Some(stored) = rows.get_mut(oid) else {
                continue;
            };
            doc.state += 1;
            stored.state = doc.state;
            for (name, value) in &row.values {
                if name != GLOBAL_ID_FIELD {
                    stored.values.insert(name.clone(), value.clone());
                }
            }
            if row.shape.is_some() {
                stored.shape = row.shape;
            }
        }
        self.summary.updated += touched;
        Ok(matched.len())
    }

    fn delete_where(
        &mut self,
        table: &str,
        key_field: &str,
        key: &Value,
    ) -> Result<usize, StoreError> {
        let matched = self.matching(table, key_field, key)?;

        let doc = &mut self.doc;
        let branch = doc
            .branches
            .get_mut(&self.branch)
            .ok_or_else(|| branch_not_found(&self.store, &self.branch))?;
        let rows = branch.tables.entry(table.to_string()).or_default();
        for oid in &matched {
            if let Some(removed) = rows.remove(oid) {
                doc.state += 1;
                branch.tombstones.push(Tombstone {
                    table: table.to_string(),
                    global_id: removed.global_id,
                    state: doc.state,
                });
            }
        }
        self.summary.deleted += matched.len();
        Ok(matched.len())
    }
}

impl BranchEditor for LocalEditor<'_> {
    fn commit(self: Box<Self>) -> Result<EditSummary, StoreError> {
        self.backend.save_store(&self.store, &self.doc)?;
        tracing::debug!(
            store = %self.store,
            branch = %self.branch,
            inserted = self.summary.inserted,
            updated = self.summary.updated,
            deleted = self.summary.deleted,
            "committed edit session"
        );
        Ok(self.summary)
    }
}
