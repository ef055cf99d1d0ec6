// Library crate for colfs: chunked byte streams, sharding and advisory locks
// over column-oriented key-value stores.

pub mod adapter;
pub mod cadapter;
pub mod chuck;
pub mod config;
pub mod error;
pub mod lock;
pub mod meta;
pub mod shard;
pub mod vfs;

// re-export selected public API
pub use adapter::{AsyncStreamReader, AsyncStreamWriter};
pub use cadapter::{BackendRef, Column, ColumnBackend, InMemoryBackend};
pub use chuck::{ChunkLayout, StreamReader, StreamWriter};
pub use config::{Config, load_config};
pub use error::{Error, Result};
pub use lock::{BackendLockCoordinator, Lock, LockCoordinator};
pub use meta::MetaStore;
pub use shard::ShardedBackend;
pub use vfs::{ColumnDirectory, Directory, build_directory};
