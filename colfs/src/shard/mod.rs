//! Sharding decorator: spreads the columns of one logical key over several
//! physical keys.
//!
//! Column `c` of logical key `k` is stored under `k<delimiter>(c % S)`, using
//! the truncating remainder, so negative columns land on the negative shard
//! suffixes `-1 ..= -(S-1)` (or `0` when they divide evenly). The mapping is
//! only stable for a fixed `S`: chunks written with one shard count are
//! unreachable under another.
//!
//! Single-cell operations touch exactly one physical key. `delete`,
//! `has_key` and `all_values` carry no column, so they fan out over every
//! suffix (`2S - 1` physical keys); that O(S) cost is the price of spreading
//! writes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::cadapter::{Column, ColumnBackend};
use crate::error::{Error, Result};

pub const DEFAULT_DELIMITER: &str = "_";

#[derive(Debug)]
pub struct ShardedBackend<B> {
    inner: B,
    shards: i64,
    delimiter: String,
}

impl<B: ColumnBackend> ShardedBackend<B> {
    pub fn new(shards: usize, delimiter: &str, inner: B) -> Result<Self> {
        if shards == 0 {
            return Err(Error::InvalidConfig("shard count must be positive".into()));
        }
        if delimiter.is_empty() {
            return Err(Error::InvalidConfig("shard delimiter must not be empty".into()));
        }
        let shards = i64::try_from(shards)
            .map_err(|_| Error::InvalidConfig(format!("shard count {shards} is too large")))?;
        Ok(Self {
            inner,
            shards,
            delimiter: delimiter.to_string(),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards as usize
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Shard suffix for a column.
    pub fn shard_of(&self, col: Column) -> i64 {
        col % self.shards
    }

    pub fn physical_key(&self, key: &str, col: Column) -> String {
        self.key_for_shard(key, self.shard_of(col))
    }

    /// Recovers the logical key from a physical one, if it carries a valid
    /// shard suffix for this shard count.
    pub fn logical_key<'a>(&self, physical: &'a str) -> Option<&'a str> {
        let (key, suffix) = physical.rsplit_once(self.delimiter.as_str())?;
        let shard: i64 = suffix.parse().ok()?;
        (shard.unsigned_abs() < self.shards as u64).then_some(key)
    }

    fn key_for_shard(&self, key: &str, shard: i64) -> String {
        format!("{key}{}{shard}", self.delimiter)
    }

    /// Every suffix a column can map to: `0..S` then `-1..=-(S-1)`.
    fn all_shards(&self) -> impl Iterator<Item = i64> {
        let shards = self.shards;
        (0..shards).chain((1..shards).map(|m| -m))
    }
}

#[async_trait]
impl<B: ColumnBackend> ColumnBackend for ShardedBackend<B> {
    async fn put(&self, key: &str, col: Column, value: Bytes) -> Result<()> {
        self.inner
            .put(&self.physical_key(key, col), col, value)
            .await
    }

    async fn get(&self, key: &str, col: Column) -> Result<Option<Bytes>> {
        self.inner.get(&self.physical_key(key, col), col).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        trace!("fan-out delete of {key} over {} shards", self.shards);
        for shard in self.all_shards() {
            self.inner.delete(&self.key_for_shard(key, shard)).await?;
        }
        Ok(())
    }

    async fn delete_column(&self, key: &str, col: Column) -> Result<()> {
        self.inner
            .delete_column(&self.physical_key(key, col), col)
            .await
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        for shard in self.all_shards() {
            if self.inner.has_key(&self.key_for_shard(key, shard)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Order is by column within each shard; shards are concatenated in
    /// suffix order, so the overall order is not column order.
    async fn all_values(&self, key: &str) -> Result<Vec<Bytes>> {
        let mut values = Vec::new();
        for shard in self.all_shards() {
            values.extend(self.inner.all_values(&self.key_for_shard(key, shard)).await?);
        }
        Ok(values)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let physical = self.inner.keys().await?;
        let logical: BTreeSet<String> = physical
            .iter()
            .filter_map(|k| self.logical_key(k))
            .map(str::to_string)
            .collect();
        Ok(logical.into_iter().collect())
    }

    async fn put_if_absent(&self, key: &str, col: Column, value: Bytes) -> Result<bool> {
        self.inner
            .put_if_absent(&self.physical_key(key, col), col, value)
            .await
    }

    fn chunk_size(&self) -> usize {
        self.inner.chunk_size()
    }
}
