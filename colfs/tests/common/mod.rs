#![allow(dead_code)]

use std::sync::{Arc, Once};

use colfs::{BackendRef, ColumnDirectory, InMemoryBackend, ShardedBackend};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Opt-in logs: `RUST_LOG=colfs=trace cargo test`.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 13 % 251) as u8).collect()
}

/// In-memory directory with the given chunk size and optional shard count.
pub fn memory_directory(
    name: &str,
    chunk_size: usize,
    shards: Option<usize>,
) -> (ColumnDirectory, Arc<InMemoryBackend>) {
    let raw = Arc::new(InMemoryBackend::new(chunk_size));
    let data: BackendRef = match shards {
        Some(s) => Arc::new(ShardedBackend::new(s, "_", raw.clone()).unwrap()) as BackendRef,
        None => raw.clone() as BackendRef,
    };
    let meta = Arc::new(InMemoryBackend::new(256));
    (ColumnDirectory::open(name, data, meta).unwrap(), raw)
}
