//! Row applier: one classified change record → one target-store write.
//!
//! The field mapping is resolved once per dataset from the target schema.
//! Fields the target has but a record lacks are warned about once per
//! dataset; they are never an error. A record's `GlobalID` is carried
//! through to the target so replicated rows keep their identity.

use std::collections::BTreeSet;

use ferry_core::{ChangeRecord, Dataset, Point, RowImage, SpatialFields, Value};
use ferry_store::{MatchScope, StoreError, TargetStore, GLOBAL_ID_FIELD};

use crate::classify::Classification;
use crate::error::ApplyError;

/// What a successful apply did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    /// An update whose key was absent; applied as a deferred insert.
    InsertedFromUpdate,
    /// Rows removed; zero is a successful no-op.
    Deleted(usize),
    /// Nothing to do for this operation code.
    Ignored,
}

/// Schema-aware mapping from a dataset's change records to target rows.
#[derive(Debug, Clone)]
pub struct RowMapping {
    table: String,
    fields: Vec<String>,
    log_key: String,
    target_key: String,
    spatial: Option<SpatialFields>,
    warned: BTreeSet<String>,
}

impl RowMapping {
    pub fn resolve<T>(target: &T, dataset: &Dataset) -> Result<Self, StoreError>
    where
        T: TargetStore + ?Sized,
    {
        let fields = target.list_fields(&dataset.target_table)?;
        Ok(Self {
            table: dataset.target_table.clone(),
            fields,
            log_key: dataset.log_primary_key.clone(),
            target_key: dataset.target_primary_key.clone(),
            spatial: dataset.spatial.clone(),
            warned: BTreeSet::new(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The record's primary-key value. `Null` counts as missing.
    pub fn key<'r>(&self, record: &'r ChangeRecord) -> Result<&'r Value, ApplyError> {
        match record.value(&self.log_key) {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(ApplyError::MissingKey {
                field: self.log_key.clone(),
            }),
        }
    }

    /// Copy every target field present in the record and its `GlobalID`,
    /// plus geometry when both coordinates are present and numeric.
    pub fn image(&mut self, record: &ChangeRecord) -> RowImage {
        let mut image = RowImage::default();
        for field in &self.fields {
            match record.value(field) {
                Some(v) => {
                    image.values.insert(field.clone(), v.clone());
                }
                None => {
                    if self.warned.insert(field.clone()) {
                        tracing::warn!(
                            table = %self.table,
                            field = %field,
                            "target field missing from change records"
                        );
                    }
                }
            }
        }
        if let Some(gid) = record.value(GLOBAL_ID_FIELD).filter(|v| !v.is_null()) {
            image.values.insert(GLOBAL_ID_FIELD.to_string(), gid.clone());
        }
        if let Some(key) = record.value(&self.log_key) {
            if self.fields.contains(&self.target_key) {
                image
                    .values
                    .entry(self.target_key.clone())
                    .or_insert_with(|| key.clone());
            }
        }
        image.shape = self.shape(record);
        image
    }

    fn shape(&self, record: &ChangeRecord) -> Option<Point> {
        let spatial = self.spatial.as_ref()?;
        let x = record.value(&spatial.x)?.as_f64()?;
        let y = record.value(&spatial.y)?.as_f64()?;
        Some(Point { x, y })
    }
}

/// Apply `record` (already classified as `kind`) to `target`.
pub fn apply<T>(
    target: &mut T,
    mapping: &mut RowMapping,
    kind: Classification,
    record: &ChangeRecord,
) -> Result<Applied, ApplyError>
where
    T: TargetStore + ?Sized,
{
    if kind == Classification::Ignore {
        return Ok(Applied::Ignored);
    }
    let key = mapping.key(record)?.clone();
    let table = mapping.table.clone();
    let field = mapping.target_key.clone();

    match kind {
        Classification::Insert => {
            if target.exists(&table, &field, &key)? {
                return Err(ApplyError::DuplicateKey { table, field, key });
            }
            target.insert(&table, &mapping.image(record))?;
            Ok(Applied::Inserted)
        }
        Classification::Update => {
            let image = mapping.image(record);
            let count = target.count_where(&table, &field, &key)?;
            match count {
                0 => {
                    tracing::debug!(table = %table, key = %key, "update missed; inserting");
                    target.insert(&table, &image)?;
                    Ok(Applied::InsertedFromUpdate)
                }
                1 => {
                    target.update_where(&table, &field, &key, &image, MatchScope::All)?;
                    Ok(Applied::Updated)
                }
                _ => {
                    target.update_where(&table, &field, &key, &image, MatchScope::First)?;
                    Err(ApplyError::MultipleMatches {
                        table,
                        field,
                        key,
                        count,
                    })
                }
            }
        }
        Classification::Delete => {
            let deleted = target.delete_where(&table, &field, &key)?;
            Ok(Applied::Deleted(deleted))
        }
        Classification::Ignore => Ok(Applied::Ignored),
    }
}
