//! VFS layer: the stream-oriented surface a search engine consumes.
//!
//! A [`ColumnDirectory`] composes a data backend (optionally sharded), an
//! unsharded metadata backend and a lock coordinator. Visibility is decided
//! by the metadata store alone: `exists`, `length`, `list` and `open` never
//! look at chunk rows, so a stream whose writer has not closed is invisible
//! and its flushed chunks are orphaned until overwritten or deleted.
//!
//! Lock rows share the data namespace with stream rows, keyed
//! `<directory>-<lock>`. Deleting a stream named like a lock row (for
//! example `idx-write.lock` in directory `idx`) also removes that lock.
//!
//! Nothing here flushes or syncs; durability is whatever the backend gives.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cadapter::{BackendRef, InMemoryBackend};
use crate::chuck::chunk::ChunkLayout;
use crate::chuck::{StreamReader, StreamWriter};
use crate::config::{BackendConfig, Config};
use crate::error::{Error, Result};
use crate::lock::{
    BackendLockCoordinator, DEFAULT_LOCK_POLL_INTERVAL, HeldLocks, Lock, LockCoordinator,
};
use crate::meta::MetaStore;
use crate::shard::ShardedBackend;

/// Buffer size used when streaming a file between directories.
const COPY_BUFFER_SIZE: usize = 8192;

#[async_trait]
pub trait Directory: Send + Sync {
    /// Starts a fresh chunk sequence for `name`. The stream stays invisible
    /// until the returned writer is closed.
    async fn create(&self, name: &str) -> Result<StreamWriter>;

    async fn open(&self, name: &str) -> Result<StreamReader>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn length(&self, name: &str) -> Result<u64>;

    async fn list(&self) -> Result<BTreeSet<String>>;

    /// Removes the stream and its chunks. Missing streams are not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    fn make_lock(&self, name: &str) -> Lock;

    /// Obtains `name` or fails with `LockUnavailable`.
    async fn lock(&self, name: &str) -> Result<Lock> {
        let mut lock = self.make_lock(name);
        if !lock.obtain().await? {
            return Err(Error::LockUnavailable(name.to_string()));
        }
        Ok(lock)
    }

    async fn clear_lock(&self, name: &str) -> Result<()>;

    /// Best-effort release of the locks this instance holds.
    async fn close(&self) -> Result<()>;

    fn lock_id(&self) -> &str;

    /// Streams `src` of `from` into `dst` of this directory.
    async fn copy_from(&self, from: &dyn Directory, src: &str, dst: &str) -> Result<u64> {
        let mut reader = from.open(src).await?;
        let mut writer = self.create(dst).await?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
        }
        writer.close().await
    }
}

pub struct ColumnDirectory {
    name: String,
    data: BackendRef,
    meta: MetaStore,
    locks: Arc<dyn LockCoordinator>,
    held: HeldLocks,
    lock_poll_interval: Duration,
}

impl ColumnDirectory {
    /// Directory `name` over `data` for chunks and `meta` for lengths. Locks
    /// live in the data backend, prefixed with `name`.
    pub fn open(name: &str, data: BackendRef, meta: BackendRef) -> Result<Self> {
        ChunkLayout::new(data.chunk_size())?;
        let locks = Arc::new(BackendLockCoordinator::new(data.clone(), name));
        Ok(Self {
            name: name.to_string(),
            data,
            meta: MetaStore::new(meta),
            locks,
            held: HeldLocks::default(),
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        })
    }

    pub fn with_lock_coordinator(mut self, locks: Arc<dyn LockCoordinator>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Names of the locks this instance currently holds.
    pub async fn held_locks(&self) -> BTreeSet<String> {
        self.held.lock().await.clone()
    }
}

#[async_trait]
impl Directory for ColumnDirectory {
    async fn create(&self, name: &str) -> Result<StreamWriter> {
        debug!("{}: create {name}", self.name);
        StreamWriter::new(name, self.data.clone(), self.meta.clone())
    }

    async fn open(&self, name: &str) -> Result<StreamReader> {
        debug!("{}: open {name}", self.name);
        StreamReader::open(name, self.data.clone(), &self.meta).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        self.meta.contains(name).await
    }

    async fn length(&self, name: &str) -> Result<u64> {
        self.meta.length(name).await
    }

    async fn list(&self) -> Result<BTreeSet<String>> {
        self.meta.names().await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        debug!("{}: delete {name}", self.name);
        self.meta.remove(name).await?;
        self.data.delete(name).await
    }

    fn make_lock(&self, name: &str) -> Lock {
        Lock::new(
            name,
            self.locks.clone(),
            self.held.clone(),
            self.lock_poll_interval,
        )
    }

    async fn clear_lock(&self, name: &str) -> Result<()> {
        self.locks.clear(name).await?;
        self.held.lock().await.remove(name);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let held: Vec<String> = std::mem::take(&mut *self.held.lock().await)
            .into_iter()
            .collect();
        for name in held {
            if let Err(e) = self.locks.clear(&name).await {
                warn!("{}: failed to clear lock {name} on close: {e}", self.name);
            }
        }
        Ok(())
    }

    fn lock_id(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ColumnDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDirectory")
            .field("name", &self.name)
            .field("chunk_size", &self.data.chunk_size())
            .finish_non_exhaustive()
    }
}

/// Builds a directory from configuration: backends, optional sharding of
/// the data namespace, and lock polling.
pub async fn build_directory(cfg: &Config) -> Result<ColumnDirectory> {
    cfg.validate()?;
    let (data, meta): (BackendRef, BackendRef) = match &cfg.backend {
        BackendConfig::Memory => {
            let data: BackendRef = Arc::new(InMemoryBackend::new(cfg.chunk_size));
            let meta: BackendRef = Arc::new(InMemoryBackend::new(cfg.meta_chunk_size));
            (data, meta)
        }
        #[cfg(feature = "etcd")]
        BackendConfig::Etcd(etcd) => {
            use crate::cadapter::etcd::{EtcdBackend, EtcdOptions};

            let base = EtcdOptions::from(etcd);
            let prefix = base.namespace.trim_end_matches('/').to_string();
            let data_opts = EtcdOptions {
                namespace: format!("{prefix}/data"),
                ..base.clone()
            };
            let meta_opts = EtcdOptions {
                namespace: format!("{prefix}/meta"),
                ..base
            };
            let data: BackendRef =
                Arc::new(EtcdBackend::connect(&data_opts, cfg.chunk_size).await?);
            let meta: BackendRef =
                Arc::new(EtcdBackend::connect(&meta_opts, cfg.meta_chunk_size).await?);
            (data, meta)
        }
        #[cfg(not(feature = "etcd"))]
        BackendConfig::Etcd(_) => {
            return Err(Error::InvalidConfig(
                "etcd backend requested but colfs was built without the `etcd` feature".into(),
            ));
        }
    };

    let data: BackendRef = match &cfg.sharding {
        Some(sharding) => Arc::new(ShardedBackend::new(
            sharding.shards,
            &sharding.delimiter,
            data,
        )?),
        None => data,
    };

    debug!(
        "built directory {} (chunk size {}, shards {:?})",
        cfg.name,
        cfg.chunk_size,
        cfg.sharding.as_ref().map(|s| s.shards)
    );
    Ok(ColumnDirectory::open(&cfg.name, data, meta)?
        .with_lock_poll_interval(cfg.lock_poll_interval()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::ColumnBackend;
    use crate::config::ShardingConfig;

    fn directory(chunk_size: usize) -> (ColumnDirectory, Arc<InMemoryBackend>) {
        let data = Arc::new(InMemoryBackend::new(chunk_size));
        let meta = Arc::new(InMemoryBackend::new(256));
        (
            ColumnDirectory::open("idx", data.clone(), meta).unwrap(),
            data,
        )
    }

    #[tokio::test]
    async fn test_visibility_follows_commit() {
        let (dir, data) = directory(4);
        let mut w = dir.create("seg").await.unwrap();
        w.write(b"0123456789").await.unwrap();

        assert!(data.has_key("seg").await.unwrap());
        assert!(!dir.exists("seg").await.unwrap());
        assert!(dir.open("seg").await.unwrap_err().is_not_found());
        assert!(dir.length("seg").await.unwrap_err().is_not_found());
        assert!(dir.list().await.unwrap().is_empty());

        w.close().await.unwrap();
        assert!(dir.exists("seg").await.unwrap());
        assert_eq!(dir.length("seg").await.unwrap(), 10);
        let mut r = dir.open("seg").await.unwrap();
        assert_eq!(r.read_to_end().await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (dir, data) = directory(4);
        let mut w = dir.create("gone").await.unwrap();
        w.write(b"abcdef").await.unwrap();
        w.close().await.unwrap();

        dir.delete("gone").await.unwrap();
        assert!(!dir.exists("gone").await.unwrap());
        assert!(!data.has_key("gone").await.unwrap());
        dir.delete("gone").await.unwrap();
        dir.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_recreate_replaces_content() {
        let (dir, _) = directory(4);
        let mut w = dir.create("f").await.unwrap();
        w.write(b"long original").await.unwrap();
        w.close().await.unwrap();

        let mut w = dir.create("f").await.unwrap();
        w.write(b"short").await.unwrap();
        w.close().await.unwrap();

        let mut r = dir.open("f").await.unwrap();
        assert_eq!(r.length(), 5);
        assert_eq!(r.read_to_end().await.unwrap(), b"short");
    }

    #[tokio::test]
    async fn test_locks_are_prefixed_and_cleared_on_close() {
        let (dir, data) = directory(8);
        assert_eq!(dir.lock_id(), "idx");

        let _lock = dir.lock("write.lock").await.unwrap();
        assert!(data.has_key("idx-write.lock").await.unwrap());
        assert!(matches!(
            dir.lock("write.lock").await,
            Err(Error::LockUnavailable(_))
        ));
        assert_eq!(
            dir.held_locks().await.into_iter().collect::<Vec<_>>(),
            vec!["write.lock"]
        );

        dir.close().await.unwrap();
        assert!(!data.has_key("idx-write.lock").await.unwrap());
        assert!(dir.held_locks().await.is_empty());
        dir.lock("write.lock").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_lock_recovers_stale_holder() {
        let data: BackendRef = Arc::new(InMemoryBackend::new(8));
        let crashed = ColumnDirectory::open("idx", data.clone(), Arc::new(InMemoryBackend::new(256)))
            .unwrap();
        let _stale = crashed.lock("write.lock").await.unwrap();
        drop(crashed);

        let dir = ColumnDirectory::open("idx", data, Arc::new(InMemoryBackend::new(256))).unwrap();
        assert!(dir.lock("write.lock").await.is_err());
        dir.clear_lock("write.lock").await.unwrap();
        let mut lock = dir.lock("write.lock").await.unwrap();
        lock.release().await.unwrap();
        assert!(!lock.is_locked().await.unwrap());
    }

    /// Never grants anything.
    struct DenyAll;

    #[async_trait]
    impl LockCoordinator for DenyAll {
        async fn acquire(&self, name: &str) -> Result<()> {
            Err(Error::LockUnavailable(name.to_string()))
        }
        async fn release(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn clear(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn is_locked(&self, _name: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_substituted_lock_coordinator() {
        let (dir, _) = directory(8);
        let dir = dir.with_lock_coordinator(Arc::new(DenyAll));
        assert!(matches!(
            dir.lock("x").await,
            Err(Error::LockUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_build_directory_from_config() {
        let mut cfg = Config::memory("built");
        cfg.chunk_size = 16;
        cfg.sharding = Some(ShardingConfig {
            shards: 3,
            delimiter: "_".into(),
        });
        let dir = build_directory(&cfg).await.unwrap();
        assert_eq!(dir.lock_id(), "built");

        let payload: Vec<u8> = (0..100u8).collect();
        let mut w = dir.create("f").await.unwrap();
        w.write(&payload).await.unwrap();
        w.close().await.unwrap();
        assert_eq!(dir.open("f").await.unwrap().read_to_end().await.unwrap(), payload);
        assert_eq!(dir.list().await.unwrap().len(), 1);

        cfg.chunk_size = 0;
        assert!(matches!(
            build_directory(&cfg).await,
            Err(Error::InvalidConfig(_))
        ));
    }
}
