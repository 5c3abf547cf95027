//! # ferry-store
//!
//! The contracts the replication engine drives (a change log, writable
//! branch views of a versioned store, branch and replica operations) plus
//! [`local::LocalBackend`], a file-backed implementation of all of them.

pub mod error;
pub mod local;
pub mod log;
pub mod versioned;

pub use error::StoreError;
pub use local::LocalBackend;
pub use log::{ChangeLog, SequenceBound};
pub use versioned::{
    BranchEditor, CompactReport, EditSummary, ExportReport, MatchScope, MergeFavor, MergeReport,
    SyncFavor, SyncReport, TargetStore, VersionedStore, GLOBAL_ID_FIELD,
};
