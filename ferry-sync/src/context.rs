//! Per-run context threaded through every stage.

use chrono::{DateTime, Utc};

use ferry_core::Config;
use ferry_store::{ChangeLog, VersionedStore};

/// Source of "now" for windows, lock stamps and run records.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Everything a run needs, borrowed for the run's duration. There is no
/// process-wide state; two contexts never share anything but the stores.
#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub config: &'a Config,
    pub log: &'a dyn ChangeLog,
    pub stores: &'a dyn VersionedStore,
    pub clock: &'a dyn Clock,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        config: &'a Config,
        log: &'a dyn ChangeLog,
        stores: &'a dyn VersionedStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            log,
            stores,
            clock,
        }
    }
}
