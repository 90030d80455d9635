//! TTL expiration engine.
//!
//! A [`Scheduler`] wakes on an interval and runs a [`CleanupPass`] under a
//! [`SingleFlight`] lock. The pass hands each active rule to the
//! [`BatchDeleter`], which removes expired entries in bounded batches:
//!
//! 1. Skip the pass if there are no active rules or another sweeper holds the lock
//! 2. Process rules in `(collection_id, time_field)` order
//! 3. Write per-rule statistics back to the registry as each rule finishes
//! 4. Release the lock on every exit path

mod deleter;
mod error;
mod guard;
mod pass;
mod scheduler;
#[cfg(test)]
pub(crate) mod testing;

pub use deleter::{BATCH_YIELD, BatchDeleter, DeleteError, RuleRun};
pub use error::{ExpirationError, SchedulerError};
pub use guard::{PassLease, SingleFlight};
pub use pass::{CleanupPass, CleanupPassResult, RuleOutcome, SkipReason};
pub use scheduler::{
    ConfigSource, FileConfigSource, HostStatus, Scheduler, SchedulerState, StaticConfigSource,
};
