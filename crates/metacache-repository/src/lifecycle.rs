//! Repository lifecycle and the periodic refresh task
//!
//! `NotStarted -> Started -> Cleared`, with `Cleared` terminal. Transitions
//! are serialized by the scheduler mutex; reads only look at the state lock
//! and never wait on a transition in progress.

use crate::error::{MetadataError, Result};
use async_trait::async_trait;
use derive_more::Display;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lifecycle state of a repository
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum LifecycleState {
    NotStarted,
    Started,
    Cleared,
}

/// Work run by the periodic refresh task
#[async_trait]
pub(crate) trait PeriodicRefresh: Send + Sync + 'static {
    async fn periodic_refresh(&self);
}

/// Handle to the running periodic refresh task
pub(crate) struct RefreshTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RefreshTask {
    /// Spawn the task: first run immediately, then every `period`
    ///
    /// The task holds only a weak reference, so dropping the repository also
    /// ends the task.
    pub(crate) fn spawn<R: PeriodicRefresh>(target: Weak<R>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("Periodic metadata refresh started (interval {:?})", period);
            let mut ticker = tokio::time::interval(period);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(target) = target.upgrade() else {
                            break;
                        };
                        target.periodic_refresh().await;
                    }
                }
            }

            info!("Periodic metadata refresh stopped");
        });

        Self { handle, shutdown }
    }

    /// Stop the task, waiting up to `grace` for an in-flight run
    ///
    /// Returns false if the task had to be aborted.
    pub(crate) async fn shutdown(self, grace: Duration) -> bool {
        let _ = self.shutdown.send(true);
        let mut handle = self.handle;

        if tokio::time::timeout(grace, &mut handle).await.is_ok() {
            return true;
        }

        error!("Periodic refresh did not stop within {:?}, aborting it", grace);
        handle.abort();
        // Wait for the abort to land so no run overlaps the cache wipe.
        let _ = handle.await;
        false
    }
}

fn usable(state: LifecycleState) -> Result<()> {
    match state {
        LifecycleState::Started => Ok(()),
        LifecycleState::NotStarted => Err(MetadataError::NotStarted),
        LifecycleState::Cleared => Err(MetadataError::Cleared),
    }
}

/// Lifecycle controller
pub(crate) struct Lifecycle {
    state: RwLock<LifecycleState>,
    scheduler: Mutex<Option<RefreshTask>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::NotStarted),
            scheduler: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.read_recursive()
    }

    /// Fail unless the repository is started
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        usable(self.state())
    }

    /// Pin the `Started` state while writing into the cache
    ///
    /// `begin_clear` cannot move to `Cleared` until the guard is dropped, so
    /// nothing installed under it outlives the wipe in `clear()`.
    pub(crate) fn install_guard(&self) -> Result<RwLockReadGuard<'_, LifecycleState>> {
        let state = self.state.read_recursive();
        usable(*state)?;
        Ok(state)
    }

    /// Move to `Started`, spawning the refresh task on the first call
    ///
    /// Returns false if the repository was already started.
    pub(crate) fn start(&self, spawn: impl FnOnce() -> RefreshTask) -> Result<bool> {
        let mut scheduler = self.scheduler.lock();
        match self.state() {
            LifecycleState::Started => Ok(false),
            LifecycleState::Cleared => Err(MetadataError::AlreadyCleared),
            LifecycleState::NotStarted => {
                *scheduler = Some(spawn());
                *self.state.write() = LifecycleState::Started;
                Ok(true)
            }
        }
    }

    /// Move to `Cleared` and hand back the refresh task for shutdown
    pub(crate) fn begin_clear(&self) -> Result<Option<RefreshTask>> {
        let mut scheduler = self.scheduler.lock();
        if self.state() == LifecycleState::Cleared {
            return Err(MetadataError::Cleared);
        }
        *self.state.write() = LifecycleState::Cleared;
        debug!("Repository lifecycle moved to {}", LifecycleState::Cleared);
        Ok(scheduler.take())
    }
}
