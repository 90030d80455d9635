use std::time::Duration;

use async_trait::async_trait;

use crate::db::error::DbResult;

/// Named, non-blocking, cross-process mutual exclusion.
///
/// A lock held by a process that dies must eventually become available again
/// without operator intervention.
#[async_trait]
pub trait LockRepo: Send + Sync {
    /// Try to take `name`. Returns false immediately if someone else holds it.
    async fn try_acquire(&self, name: &str) -> DbResult<bool>;

    /// Extend this process's hold on `name`.
    ///
    /// Returns false if the lock is no longer ours, for example because our
    /// lease ran out and another holder took it over.
    async fn renew(&self, name: &str) -> DbResult<bool>;

    /// How often a holder must call [`LockRepo::renew`] to keep the lock.
    ///
    /// `None` for locks that last as long as the holder's session.
    fn renew_interval(&self) -> Option<Duration> {
        None
    }

    /// Release `name` if this process holds it. Releasing a lock that is not
    /// held is a no-op.
    async fn release(&self, name: &str) -> DbResult<()>;
}
