//! Advisory named locks built on backend cells.
//!
//! A lock is held by whoever created the cell at column [`LOCK_COLUMN`] of
//! key `<prefix>-<name>`. Nothing about the holder is recorded: no owner,
//! no lease, no expiry. A holder that dies without releasing blocks every
//! later acquirer until someone calls `clear`.
//!
//! Mutual exclusion is only as strong as the backend's `put_if_absent`.
//! Backends relying on the default check-then-put can let two racing
//! acquirers both succeed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::cadapter::{BackendRef, Column};
use crate::error::{Error, Result};

/// Auxiliary column lock cells live in.
pub const LOCK_COLUMN: Column = -1;

/// Default interval between attempts in [`Lock::obtain_within`].
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Takes `name`, failing with `LockUnavailable` if it is already held.
    async fn acquire(&self, name: &str) -> Result<()>;

    async fn release(&self, name: &str) -> Result<()>;

    /// Removes `name` whoever holds it. Meant for recovering after a crash.
    async fn clear(&self, name: &str) -> Result<()>;

    async fn is_locked(&self, name: &str) -> Result<bool>;
}

pub struct BackendLockCoordinator {
    backend: BackendRef,
    prefix: String,
}

impl BackendLockCoordinator {
    pub fn new(backend: BackendRef, prefix: &str) -> Self {
        Self {
            backend,
            prefix: prefix.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn lock_key(&self, name: &str) -> String {
        format!("{}-{}", self.prefix, name)
    }
}

#[async_trait]
impl LockCoordinator for BackendLockCoordinator {
    async fn acquire(&self, name: &str) -> Result<()> {
        let key = self.lock_key(name);
        if self
            .backend
            .put_if_absent(&key, LOCK_COLUMN, Bytes::from_static(&[1]))
            .await?
        {
            debug!("acquired lock {key}");
            Ok(())
        } else {
            Err(Error::LockUnavailable(key))
        }
    }

    async fn release(&self, name: &str) -> Result<()> {
        let key = self.lock_key(name);
        debug!("released lock {key}");
        self.backend.delete_column(&key, LOCK_COLUMN).await
    }

    async fn clear(&self, name: &str) -> Result<()> {
        let key = self.lock_key(name);
        if self.backend.get(&key, LOCK_COLUMN).await?.is_some() {
            warn!("force clearing lock {key}");
        }
        self.backend.delete_column(&key, LOCK_COLUMN).await
    }

    async fn is_locked(&self, name: &str) -> Result<bool> {
        Ok(self
            .backend
            .get(&self.lock_key(name), LOCK_COLUMN)
            .await?
            .is_some())
    }
}

/// Lock names a directory instance currently holds, so they can be
/// cleared when it closes.
pub type HeldLocks = Arc<Mutex<BTreeSet<String>>>;

/// Handle on one named lock. Dropping it does not release the lock.
pub struct Lock {
    name: String,
    coordinator: Arc<dyn LockCoordinator>,
    held: HeldLocks,
    poll_interval: Duration,
    obtained: bool,
}

impl Lock {
    pub(crate) fn new(
        name: &str,
        coordinator: Arc<dyn LockCoordinator>,
        held: HeldLocks,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            coordinator,
            held,
            poll_interval,
            obtained: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Single attempt; `Ok(false)` when someone else holds the lock.
    pub async fn obtain(&mut self) -> Result<bool> {
        match self.coordinator.acquire(&self.name).await {
            Ok(()) => {
                self.obtained = true;
                self.held.lock().await.insert(self.name.clone());
                Ok(true)
            }
            Err(Error::LockUnavailable(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Retries every poll interval until `timeout` elapses, then fails with
    /// `LockUnavailable`.
    pub async fn obtain_within(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.obtain().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockUnavailable(self.name.clone()));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Releases the lock if this handle holds it; otherwise a no-op, so a
    /// handle that lost the race never removes the holder's entry.
    pub async fn release(&mut self) -> Result<()> {
        if !self.obtained {
            return Ok(());
        }
        self.coordinator.release(&self.name).await?;
        self.obtained = false;
        self.held.lock().await.remove(&self.name);
        Ok(())
    }

    pub async fn is_locked(&self) -> Result<bool> {
        self.coordinator.is_locked(&self.name).await
    }

    /// Whether this handle obtained the lock and has not released it.
    pub fn is_obtained(&self) -> bool {
        self.obtained
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.name)
            .field("obtained", &self.obtained)
            .finish()
    }
}
