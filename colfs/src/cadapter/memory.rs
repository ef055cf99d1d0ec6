//! In-process column backend: rows live in a `BTreeMap` behind an async lock.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{Column, ColumnBackend};
use crate::error::Result;

type Row = BTreeMap<Column, Bytes>;

#[derive(Debug)]
pub struct InMemoryBackend {
    chunk_size: usize,
    rows: RwLock<BTreeMap<String, Row>>,
}

impl InMemoryBackend {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of columns stored under `key`.
    pub async fn column_count(&self, key: &str) -> usize {
        self.rows.read().await.get(key).map_or(0, |row| row.len())
    }

    /// Lengths of the values under `key`, ordered by column.
    pub async fn value_lens(&self, key: &str) -> Vec<usize> {
        self.rows
            .read()
            .await
            .get(key)
            .map(|row| row.values().map(Bytes::len).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ColumnBackend for InMemoryBackend {
    async fn put(&self, key: &str, col: Column, value: Bytes) -> Result<()> {
        self.rows
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(col, value);
        Ok(())
    }

    async fn get(&self, key: &str, col: Column) -> Result<Option<Bytes>> {
        Ok(self
            .rows
            .read()
            .await
            .get(key)
            .and_then(|row| row.get(&col))
            .cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.rows.write().await.remove(key);
        Ok(())
    }

    async fn delete_column(&self, key: &str, col: Column) -> Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.get_mut(key) {
            row.remove(&col);
            // an empty row no longer counts as an existing key
            if row.is_empty() {
                rows.remove(key);
            }
        }
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.rows.read().await.contains_key(key))
    }

    async fn all_values(&self, key: &str) -> Result<Vec<Bytes>> {
        Ok(self
            .rows
            .read()
            .await
            .get(key)
            .map(|row| row.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.rows.read().await.keys().cloned().collect())
    }

    async fn put_if_absent(&self, key: &str, col: Column, value: Bytes) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let row = rows.entry(key.to_string()).or_default();
        if row.contains_key(&col) {
            return Ok(false);
        }
        row.insert(col, value);
        Ok(true)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_delete_column() {
        let backend = InMemoryBackend::new(16);
        backend.put("a", 0, Bytes::from_static(b"x")).await.unwrap();
        backend.put("a", 3, Bytes::from_static(b"yz")).await.unwrap();

        assert_eq!(backend.get("a", 3).await.unwrap().unwrap(), "yz");
        assert!(backend.get("a", 1).await.unwrap().is_none());
        assert!(backend.get("b", 0).await.unwrap().is_none());
        assert_eq!(backend.column_count("a").await, 2);

        backend.delete_column("a", 0).await.unwrap();
        assert!(backend.has_key("a").await.unwrap());
        backend.delete_column("a", 3).await.unwrap();
        assert!(!backend.has_key("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_all_values_ordered_by_column() {
        let backend = InMemoryBackend::new(16);
        backend.put("k", 2, Bytes::from_static(b"c")).await.unwrap();
        backend.put("k", -1, Bytes::from_static(b"a")).await.unwrap();
        backend.put("k", 0, Bytes::from_static(b"b")).await.unwrap();

        let values = backend.all_values("k").await.unwrap();
        assert_eq!(values, vec!["a", "b", "c"]);
        assert!(backend.all_values("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let backend = InMemoryBackend::new(16);
        backend.delete("nothing").await.unwrap();
        backend.delete_column("nothing", 7).await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_if_absent_is_exclusive() {
        let backend = Arc::new(InMemoryBackend::new(16));
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend
                    .put_if_absent("lock", -1, Bytes::from(vec![i]))
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
