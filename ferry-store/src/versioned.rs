//! Versioned store contracts: writable branch views and branch/replica
//! operations.

use std::path::Path;

use serde::Serialize;

use ferry_core::{BranchName, RowImage, StoreName, Value};

use crate::StoreError;

/// System-generated identity carried by every row; used to match rows
/// across stores. Never expected in a change record.
pub const GLOBAL_ID_FIELD: &str = "GlobalID";

/// How many matching rows an update touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    All,
    First,
}

/// Which side wins when a row changed on both the edit branch and the
/// baseline since they last met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeFavor {
    /// Edits from the merged branch take precedence, row by row.
    EditBranch,
    Baseline,
}

/// Which store wins when a replicated row also changed at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncFavor {
    Source,
    Destination,
}

/// Row-level access to one branch of one table space.
///
/// Rows are located by an arbitrary key field; system fields (object id,
/// geometry, [`GLOBAL_ID_FIELD`]) are handled by the backend.
pub trait TargetStore {
    /// Attribute fields of `table`, excluding object id, geometry and
    /// [`GLOBAL_ID_FIELD`].
    fn list_fields(&self, table: &str) -> Result<Vec<String>, StoreError>;

    fn count_where(&self, table: &str, key_field: &str, key: &Value)
        -> Result<usize, StoreError>;

    fn exists(&self, table: &str, key_field: &str, key: &Value) -> Result<bool, StoreError> {
        Ok(self.count_where(table, key_field, key)? > 0)
    }

    fn insert(&mut self, table: &str, row: &RowImage) -> Result<(), StoreError>;

    /// Overwrite the named columns of matching rows; returns the match count
    /// before `scope` was applied.
    fn update_where(
        &mut self,
        table: &str,
        key_field: &str,
        key: &Value,
        row: &RowImage,
        scope: MatchScope,
    ) -> Result<usize, StoreError>;

    /// Delete every matching row; returns how many were deleted.
    fn delete_where(&mut self, table: &str, key_field: &str, key: &Value)
        -> Result<usize, StoreError>;
}

/// Counts of row writes made through one editor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EditSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// A scoped edit session on one branch. Nothing is visible to other readers
/// until [`BranchEditor::commit`]; dropping the editor discards its writes.
pub trait BranchEditor: TargetStore {
    fn commit(self: Box<Self>) -> Result<EditSummary, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub branches: usize,
    pub rows_posted: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub upserted: usize,
    pub deleted: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactReport {
    pub tombstones_removed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub upserts: usize,
    pub deletes: usize,
}

/// Branch and replica operations over a set of named versioned stores.
pub trait VersionedStore {
    /// Open a scoped edit session on `branch` of `store`.
    fn open_branch<'a>(
        &'a self,
        store: &StoreName,
        branch: &BranchName,
    ) -> Result<Box<dyn BranchEditor + 'a>, StoreError>;

    /// Merge each edit branch into `baseline`, in order, and rebase it.
    fn merge(
        &self,
        store: &StoreName,
        edit_branches: &[BranchName],
        baseline: &BranchName,
        favor: MergeFavor,
    ) -> Result<MergeReport, StoreError>;

    /// Push baseline changes of `source` made since the last sync through
    /// `replica` onto the baseline of `destination`. Never touches the
    /// destination's edit branches.
    fn sync(
        &self,
        source: &StoreName,
        replica: &str,
        destination: &StoreName,
        favor: SyncFavor,
    ) -> Result<SyncReport, StoreError>;

    /// Drop history no branch or replica cursor can still need.
    fn compact(&self, store: &StoreName) -> Result<CompactReport, StoreError>;

    /// Write a data-change message with baseline changes not yet exported
    /// through `replica`.
    fn export_changes(
        &self,
        store: &StoreName,
        replica: &str,
        artifact: &Path,
    ) -> Result<ExportReport, StoreError>;
}
