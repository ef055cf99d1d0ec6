//! Stream metadata store
//!
//! Records the committed length of every stream in its own backend
//! namespace. An entry exists exactly for the streams whose writer has
//! closed; its absence hides a stream no matter which chunks are stored.

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::trace;

use crate::cadapter::{BackendRef, Column};
use crate::error::{Error, Result};

/// Column holding the big-endian `u64` length of a stream.
const LENGTH_COLUMN: Column = 0;

#[derive(Clone)]
pub struct MetaStore {
    backend: BackendRef,
}

impl MetaStore {
    pub fn new(backend: BackendRef) -> Self {
        Self { backend }
    }

    pub async fn set_length(&self, name: &str, length: u64) -> Result<()> {
        trace!("meta: {name} -> {length} bytes");
        self.backend
            .put(
                name,
                LENGTH_COLUMN,
                Bytes::copy_from_slice(&length.to_be_bytes()),
            )
            .await
    }

    /// Fails with `NotFound` when `name` has never been committed.
    pub async fn length(&self, name: &str) -> Result<u64> {
        let raw = self
            .backend
            .get(name, LENGTH_COLUMN)
            .await?
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let bytes: [u8; 8] = raw
            .as_ref()
            .try_into()
            .map_err(|_| Error::CorruptMetadata {
                name: name.to_string(),
                reason: format!("length entry is {} bytes, expected 8", raw.len()),
            })?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        self.backend.has_key(name).await
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        self.backend.delete(name).await
    }

    pub async fn names(&self) -> Result<BTreeSet<String>> {
        Ok(self.backend.keys().await?.into_iter().collect())
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore").finish_non_exhaustive()
    }
}
