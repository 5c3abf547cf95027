//! Ferry core library: domain types, typed configuration, dataset registry.
//!
//! - [`types`]: newtypes, values, change records, datasets
//! - [`config`]: `ferry.yaml` schema, load / validate
//! - [`registry`]: resolve a channel's datasets against run state
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{Config, DatasetConfig, StoreConfig, SyncChannel};
pub use error::ConfigError;
pub use types::{
    BranchName, ChangeRecord, ChannelName, Dataset, Point, Row, RowImage, SequenceKey,
    SpatialFields, StoreName, Value,
};
