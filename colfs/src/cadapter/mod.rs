//! Column store adapter (cadapter)
//!
//! A backend is a column-addressable key-value store: every row key owns a
//! sparse set of integer columns holding opaque byte values. Stream chunks,
//! stream metadata and lock entries are all laid out on top of this shape.
//!
//! Consistency the upper layers rely on:
//! - read-your-writes for a single `(key, column)` from the same process;
//! - nothing across keys. A chunk write and the metadata write that commits
//!   it are independent calls, ordered only as far as the backend orders two
//!   independent writes.
//!
//! Submodules:
//! - `memory`: in-process backend used for tests and single-node setups
//! - `etcd`: adapter for an etcd/xline cluster (feature `etcd`)
pub mod memory;

#[cfg(feature = "etcd")]
pub mod etcd;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub use memory::InMemoryBackend;

/// Column index within a row. Negative columns hold auxiliary rows such as
/// lock entries; chunk data always lives at non-negative columns.
pub type Column = i64;

#[async_trait]
pub trait ColumnBackend: Send + Sync {
    async fn put(&self, key: &str, col: Column, value: Bytes) -> Result<()>;

    /// Absent columns yield `None`.
    async fn get(&self, key: &str, col: Column) -> Result<Option<Bytes>>;

    /// Removes every column of `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn delete_column(&self, key: &str, col: Column) -> Result<()>;

    async fn has_key(&self, key: &str) -> Result<bool>;

    /// Values of `key` ordered by column.
    async fn all_values(&self, key: &str) -> Result<Vec<Bytes>>;

    /// Every row key currently holding at least one column.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Stores `value` only if `(key, col)` is empty and reports whether it did.
    ///
    /// The default is a plain check-then-put and is NOT atomic: two callers
    /// racing on the same cell may both observe it empty and both succeed.
    /// Backends able to compare-and-create must override it.
    async fn put_if_absent(&self, key: &str, col: Column, value: Bytes) -> Result<bool> {
        if self.get(key, col).await?.is_some() {
            return Ok(false);
        }
        self.put(key, col, value).await?;
        Ok(true)
    }

    /// Size in bytes of the fragments streams are split into.
    fn chunk_size(&self) -> usize;
}

#[async_trait]
impl<T: ColumnBackend + ?Sized> ColumnBackend for Arc<T> {
    async fn put(&self, key: &str, col: Column, value: Bytes) -> Result<()> {
        (**self).put(key, col, value).await
    }

    async fn get(&self, key: &str, col: Column) -> Result<Option<Bytes>> {
        (**self).get(key, col).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn delete_column(&self, key: &str, col: Column) -> Result<()> {
        (**self).delete_column(key, col).await
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        (**self).has_key(key).await
    }

    async fn all_values(&self, key: &str) -> Result<Vec<Bytes>> {
        (**self).all_values(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        (**self).keys().await
    }

    async fn put_if_absent(&self, key: &str, col: Column, value: Bytes) -> Result<bool> {
        (**self).put_if_absent(key, col, value).await
    }

    fn chunk_size(&self) -> usize {
        (**self).chunk_size()
    }
}

/// Shared, type-erased backend handle passed between the facade layers.
pub type BackendRef = Arc<dyn ColumnBackend>;
