//! Scheduler loop driving periodic cleanup passes.
//!
//! The loop waits on a single `select!` over shutdown, configuration
//! reloads and the interval timer. Only timer expiry runs a pass; a reload
//! restarts the wait with the new interval. Pass failures are logged and the
//! loop keeps going.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::{CleanupPass, CleanupPassResult, ExpirationError, SchedulerError};
use crate::{
    config::{ConfigError, EngineConfig, SchedulerConfig},
    db::{DbPool, DbResult},
};

/// Authoritative source of the scheduler configuration.
pub trait ConfigSource: Send + Sync {
    fn read_config(&self) -> Result<SchedulerConfig, ConfigError>;
}

/// Re-reads the `[scheduler]` section of a TOML config file.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn read_config(&self) -> Result<SchedulerConfig, ConfigError> {
        Ok(EngineConfig::from_file(&self.path)?.scheduler)
    }
}

/// In-process configuration, replaced with [`StaticConfigSource::set`].
pub struct StaticConfigSource {
    config: RwLock<SchedulerConfig>,
}

impl StaticConfigSource {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn set(&self, config: SchedulerConfig) {
        *self.config.write() = config;
    }
}

impl ConfigSource for StaticConfigSource {
    fn read_config(&self) -> Result<SchedulerConfig, ConfigError> {
        Ok(self.config.read().clone())
    }
}

/// Whether the database currently accepts writes.
#[async_trait]
pub trait HostStatus: Send + Sync {
    async fn is_writable(&self) -> DbResult<bool>;
}

#[async_trait]
impl HostStatus for DbPool {
    async fn is_writable(&self) -> DbResult<bool> {
        DbPool::is_writable(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Waiting,
    Running,
    ReloadingConfig,
    ShuttingDown,
}

enum Wake {
    Timer,
    Reload,
    Shutdown,
}

struct Inner {
    pass: CleanupPass,
    host: Arc<dyn HostStatus>,
    source: Arc<dyn ConfigSource>,
    config: watch::Sender<SchedulerConfig>,
    state: watch::Sender<SchedulerState>,
}

impl Inner {
    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }
}

struct LoopHandle {
    /// Cancels the loop when dropped.
    shutdown: DropGuard,
    /// Cancelled when the loop task ends, including by panic.
    exited: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    running: tokio::sync::Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    /// Build a stopped scheduler with the source's current configuration.
    pub fn new(
        pass: CleanupPass,
        host: Arc<dyn HostStatus>,
        source: Arc<dyn ConfigSource>,
    ) -> Result<Self, SchedulerError> {
        let config = source.read_config()?;
        config.validate()?;

        let (config, _) = watch::channel(config);
        let (state, _) = watch::channel(SchedulerState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                pass,
                host,
                source,
                config,
                state,
            }),
            running: tokio::sync::Mutex::new(None),
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> SchedulerConfig {
        self.inner.config.borrow().clone()
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Run a pass now, independent of the timer and of `enabled`.
    pub async fn run_one_pass(&self) -> Result<CleanupPassResult, ExpirationError> {
        let lock_name = self.inner.config.borrow().lock_name.clone();
        self.inner.pass.run_one_pass(&lock_name).await
    }

    /// Start the loop. Starting a running scheduler is a no-op.
    ///
    /// Refuses to start while the database is read-only or in recovery.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return Ok(());
        }

        let writable = self
            .inner
            .host
            .is_writable()
            .await
            .map_err(SchedulerError::HostStatus)?;
        if !writable {
            return Err(SchedulerError::HostNotWritable);
        }

        let config = self.config();
        tracing::info!(
            interval_secs = config.interval_secs,
            enabled = config.enabled,
            lock = %config.lock_name,
            "Starting expiration scheduler"
        );

        let cancel = CancellationToken::new();
        let exited = CancellationToken::new();
        let done = exited.clone().drop_guard();
        let inner = Arc::clone(&self.inner);
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let _done = done;
            run_loop(inner, loop_cancel).await;
        });
        *running = Some(LoopHandle {
            shutdown: cancel.drop_guard(),
            exited,
            task,
        });
        Ok(())
    }

    /// Wait until the loop exits, whether stopped or dead.
    ///
    /// Returns at once when no loop was started. Callers that never asked
    /// for a stop can treat a return as the loop having failed.
    pub async fn exited(&self) {
        let exited = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|h| h.exited.clone());
        if let Some(exited) = exited {
            exited.cancelled_owned().await;
        }
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// An in-flight pass finishes its current batch first. Returns whether a
    /// loop was running.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(LoopHandle { shutdown, task, .. }) = running.take() else {
            return false;
        };

        drop(shutdown);
        if let Err(e) = task.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "Expiration scheduler panicked");
        }

        self.inner.set_state(SchedulerState::Idle);
        tracing::info!("Expiration scheduler stopped");
        true
    }

    /// Re-read the configuration source.
    ///
    /// An invalid configuration is rejected and the previous one stays in
    /// effect. A running loop picks the new snapshot up at its next wait.
    pub async fn reload(&self) -> Result<SchedulerConfig, ConfigError> {
        let config = self
            .inner
            .source
            .read_config()
            .and_then(|c| c.validate().map(|()| c));

        match config {
            Ok(config) => {
                self.inner.config.send_replace(config.clone());
                Ok(config)
            }
            Err(e) => {
                tracing::error!(error = %e, "Rejected scheduler configuration reload");
                Err(e)
            }
        }
    }
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut config_rx = inner.config.subscribe();
    inner.set_state(SchedulerState::Idle);

    loop {
        let config = config_rx.borrow_and_update().clone();
        inner.set_state(SchedulerState::Waiting);

        let wake = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Shutdown,
            changed = config_rx.changed() => match changed {
                Ok(()) => Wake::Reload,
                Err(_) => Wake::Shutdown,
            },
            _ = tokio::time::sleep(config.interval()) => Wake::Timer,
        };

        match wake {
            Wake::Shutdown => break,
            Wake::Reload => {
                inner.set_state(SchedulerState::ReloadingConfig);
                let next = config_rx.borrow().clone();
                tracing::info!(
                    interval_secs = next.interval_secs,
                    enabled = next.enabled,
                    lock = %next.lock_name,
                    "Scheduler configuration reloaded"
                );
            }
            Wake::Timer => {
                if !config.enabled {
                    tracing::debug!("Scheduler disabled, skipping pass");
                    continue;
                }

                match inner.host.is_writable().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("Database is read-only, skipping pass");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to check database status, skipping pass");
                        continue;
                    }
                }

                inner.set_state(SchedulerState::Running);
                if let Err(e) = inner.pass.run(&config.lock_name, &cancel).await {
                    tracing::error!(error = %e, "Cleanup pass failed");
                }
            }
        }
    }

    inner.set_state(SchedulerState::ShuttingDown);
    tracing::debug!("Expiration scheduler loop exiting");
}
