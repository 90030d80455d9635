//! Single-flight guard around a cleanup pass.

use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::ExpirationError;
use crate::db::{DbResult, LockRepo};

/// Try-and-skip mutual exclusion for one lock name.
pub struct SingleFlight {
    locks: Arc<dyn LockRepo>,
    name: String,
    on_loss: Option<CancellationToken>,
}

impl SingleFlight {
    pub fn new(locks: Arc<dyn LockRepo>, name: impl Into<String>) -> Self {
        Self {
            locks,
            name: name.into(),
            on_loss: None,
        }
    }

    /// Cancel `token` if a held lease cannot be renewed.
    pub fn cancel_on_loss(mut self, token: CancellationToken) -> Self {
        self.on_loss = Some(token);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub async fn try_enter(&self) -> Result<Option<PassLease>, ExpirationError> {
        let acquired = self.locks.try_acquire(&self.name).await.map_err(|source| {
            ExpirationError::AcquireLock {
                name: self.name.clone(),
                source,
            }
        })?;

        if !acquired {
            return Ok(None);
        }

        let heartbeat = self
            .locks
            .renew_interval()
            .map(|every| self.spawn_heartbeat(every));

        Ok(Some(PassLease {
            locks: Arc::clone(&self.locks),
            name: self.name.clone(),
            heartbeat,
            released: false,
        }))
    }

    /// Renew the lease every `every` until the returned guard is dropped.
    fn spawn_heartbeat(&self, every: Duration) -> DropGuard {
        let stop = CancellationToken::new();
        let locks = Arc::clone(&self.locks);
        let name = self.name.clone();
        let on_loss = self.on_loss.clone();
        let stopped = stop.clone();

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + every, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    _ = ticks.tick() => {}
                }

                match locks.renew(&name).await {
                    Ok(true) => tracing::trace!(lock = %name, "Renewed lock lease"),
                    // A renewal racing the release finds the row already gone
                    Ok(false) if stopped.is_cancelled() => break,
                    Ok(false) => {
                        tracing::error!(lock = %name, "Lock lease lost, stopping pass");
                        if let Some(token) = &on_loss {
                            token.cancel();
                        }
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(lock = %name, error = %e, "Failed to renew lock lease")
                    }
                }
            }
        });

        stop.drop_guard()
    }
}

/// Proof that this process holds the single-flight lock.
///
/// Call [`PassLease::release`] on every path. If the lease is dropped
/// without it (a panic or a cancelled future), release is spawned on the
/// current runtime instead.
#[must_use = "a lease that is never released holds the lock until the session ends"]
pub struct PassLease {
    locks: Arc<dyn LockRepo>,
    name: String,
    heartbeat: Option<DropGuard>,
    released: bool,
}

impl PassLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(mut self) -> DbResult<()> {
        self.heartbeat.take();
        self.released = true;
        self.locks.release(&self.name).await
    }
}

impl Drop for PassLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime; the store frees the lock when the session or lease ends
            return;
        };

        let locks = Arc::clone(&self.locks);
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            if let Err(e) = locks.release(&name).await {
                tracing::warn!(lock = %name, error = %e, "Failed to release dropped lock");
            }
        });
    }
}
