//! etcd/xline adapter: every `(key, column)` cell is one etcd key.
//!
//! Layout: `<namespace>/<row key><US><column>` where `US` is the ASCII unit
//! separator. A row is therefore a key prefix, which is what `delete`,
//! `has_key` and `all_values` scan.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions, KvClient, Txn, TxnOp,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Column, ColumnBackend};
use crate::error::Result;

const COLUMN_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone)]
pub struct EtcdOptions {
    pub endpoints: Vec<String>,
    pub namespace: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub struct EtcdBackend {
    kv: Arc<Mutex<KvClient>>,
    namespace: String,
    chunk_size: usize,
}

impl EtcdBackend {
    pub async fn connect(options: &EtcdOptions, chunk_size: usize) -> Result<Self> {
        let connect_opts = match (&options.username, &options.password) {
            (Some(user), Some(password)) => {
                Some(ConnectOptions::new().with_user(user.clone(), password.clone()))
            }
            _ => None,
        };
        let client = Client::connect(options.endpoints.clone(), connect_opts).await?;
        debug!(
            "connected to etcd endpoints {:?} under namespace {}",
            options.endpoints, options.namespace
        );
        Ok(Self::with_kv_client(
            client.kv_client(),
            &options.namespace,
            chunk_size,
        ))
    }

    /// Shares an existing connection; `namespace` isolates this backend's rows.
    pub fn with_kv_client(kv: KvClient, namespace: &str, chunk_size: usize) -> Self {
        Self {
            kv: Arc::new(Mutex::new(kv)),
            namespace: namespace.trim_end_matches('/').to_string(),
            chunk_size,
        }
    }

    fn rows_prefix(&self) -> String {
        format!("{}/", self.namespace)
    }

    fn row_prefix(&self, key: &str) -> String {
        format!("{}/{}{}", self.namespace, key, COLUMN_SEPARATOR)
    }

    fn cell_key(&self, key: &str, col: Column) -> String {
        format!("{}{}", self.row_prefix(key), col)
    }

    /// Splits `<namespace>/<row><US><col>` back into `(row, col)`.
    fn parse_cell_key<'a>(&self, raw: &'a [u8]) -> Option<(&'a str, Column)> {
        let raw = std::str::from_utf8(raw).ok()?;
        let rest = raw.strip_prefix(&self.namespace)?.strip_prefix('/')?;
        let (row, col) = rest.rsplit_once(COLUMN_SEPARATOR)?;
        Some((row, col.parse().ok()?))
    }
}

#[async_trait]
impl ColumnBackend for EtcdBackend {
    async fn put(&self, key: &str, col: Column, value: Bytes) -> Result<()> {
        let cell = self.cell_key(key, col);
        self.kv.lock().await.put(cell, value.to_vec(), None).await?;
        Ok(())
    }

    async fn get(&self, key: &str, col: Column) -> Result<Option<Bytes>> {
        let cell = self.cell_key(key, col);
        let resp = self.kv.lock().await.get(cell, None).await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| Bytes::copy_from_slice(kv.value())))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let prefix = self.row_prefix(key);
        self.kv
            .lock()
            .await
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await?;
        Ok(())
    }

    async fn delete_column(&self, key: &str, col: Column) -> Result<()> {
        let cell = self.cell_key(key, col);
        self.kv.lock().await.delete(cell, None).await?;
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let prefix = self.row_prefix(key);
        let opts = GetOptions::new()
            .with_prefix()
            .with_keys_only()
            .with_limit(1);
        let resp = self.kv.lock().await.get(prefix, Some(opts)).await?;
        Ok(!resp.kvs().is_empty())
    }

    async fn all_values(&self, key: &str) -> Result<Vec<Bytes>> {
        let prefix = self.row_prefix(key);
        let resp = self
            .kv
            .lock()
            .await
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        // etcd orders keys bytewise, so "10" sorts before "2"
        let mut cells: Vec<(Column, Bytes)> = resp
            .kvs()
            .iter()
            .filter_map(|kv| {
                let (row, col) = self.parse_cell_key(kv.key())?;
                (row == key).then(|| (col, Bytes::copy_from_slice(kv.value())))
            })
            .collect();
        cells.sort_by_key(|(col, _)| *col);
        Ok(cells.into_iter().map(|(_, v)| v).collect())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let opts = GetOptions::new().with_prefix().with_keys_only();
        let resp = self
            .kv
            .lock()
            .await
            .get(self.rows_prefix(), Some(opts))
            .await?;
        let rows: BTreeSet<String> = resp
            .kvs()
            .iter()
            .filter_map(|kv| self.parse_cell_key(kv.key()).map(|(row, _)| row.to_string()))
            .collect();
        Ok(rows.into_iter().collect())
    }

    async fn put_if_absent(&self, key: &str, col: Column, value: Bytes) -> Result<bool> {
        let cell = self.cell_key(key, col);
        let txn = Txn::new()
            .when([Compare::version(cell.clone(), CompareOp::Equal, 0)])
            .and_then([TxnOp::put(cell, value.to_vec(), None)]);
        let resp = self.kv.lock().await.txn(txn).await?;
        Ok(resp.succeeded())
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl std::fmt::Debug for EtcdBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdBackend")
            .field("namespace", &self.namespace)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl From<&crate::config::EtcdConfig> for EtcdOptions {
    fn from(cfg: &crate::config::EtcdConfig) -> Self {
        Self {
            endpoints: cfg.endpoints.clone(),
            namespace: cfg.prefix.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Option<Vec<String>> {
        std::env::var("COLFS_ETCD_ENDPOINTS")
            .ok()
            .map(|v| v.split(',').map(str::to_string).collect())
    }

    #[tokio::test]
    #[ignore = "needs a live etcd endpoint in COLFS_ETCD_ENDPOINTS"]
    async fn test_etcd_backend_roundtrip() {
        let Some(endpoints) = endpoints() else {
            return;
        };
        let namespace = format!(
            "/colfs-test/{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        let options = EtcdOptions {
            endpoints,
            namespace,
            username: None,
            password: None,
        };
        let backend = EtcdBackend::connect(&options, 8).await.unwrap();

        backend.put("a", 10, Bytes::from_static(b"ten")).await.unwrap();
        backend.put("a", 2, Bytes::from_static(b"two")).await.unwrap();
        backend.put("ab", 0, Bytes::from_static(b"other")).await.unwrap();

        assert_eq!(backend.get("a", 2).await.unwrap().unwrap(), "two");
        assert_eq!(backend.all_values("a").await.unwrap(), vec!["two", "ten"]);
        assert_eq!(backend.keys().await.unwrap(), vec!["a", "ab"]);

        assert!(backend.put_if_absent("l", -1, Bytes::new()).await.unwrap());
        assert!(!backend.put_if_absent("l", -1, Bytes::new()).await.unwrap());

        backend.delete("a").await.unwrap();
        assert!(!backend.has_key("a").await.unwrap());
        assert!(backend.has_key("ab").await.unwrap());
        backend.delete("ab").await.unwrap();
        backend.delete("l").await.unwrap();
    }
}
