//! StreamWriter: appends bytes to a named stream one chunk at a time.
//!
//! At most one chunk is buffered. A full chunk is stored as soon as it fills;
//! `close` stores the trailing partial chunk and then records the total length
//! in the metadata store, which is the moment the stream becomes visible.

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tracing::{debug, trace, warn};

use super::chunk::ChunkLayout;
use crate::cadapter::{BackendRef, Column};
use crate::error::{Error, Result};
use crate::meta::MetaStore;

pub struct StreamWriter {
    name: String,
    data: BackendRef,
    meta: MetaStore,
    layout: ChunkLayout,
    buf: BytesMut,
    next_index: u64,
    written: u64,
    crc: crc32fast::Hasher,
    closed: bool,
}

impl StreamWriter {
    /// Starts a fresh chunk sequence for `name` at index 0. Chunks of a
    /// previous incarnation are overwritten index by index; nothing is
    /// deleted up front.
    pub fn new(name: &str, data: BackendRef, meta: MetaStore) -> Result<Self> {
        let layout = ChunkLayout::new(data.chunk_size())?;
        Ok(Self {
            name: name.to_string(),
            data,
            meta,
            layout,
            buf: BytesMut::with_capacity(layout.chunk_size as usize),
            next_index: 0,
            written: 0,
            crc: crc32fast::Hasher::new(),
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes accepted so far, i.e. the current file pointer.
    pub fn position(&self) -> u64 {
        self.written
    }

    /// CRC32 of every byte accepted so far.
    pub fn checksum(&self) -> u32 {
        self.crc.clone().finalize()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn write(&mut self, mut src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        while !src.is_empty() {
            if self.is_full() {
                self.store_buffered().await?;
            }
            let n = self.buffer(src)?;
            src = &src[n..];
        }
        if self.is_full() {
            self.store_buffered().await?;
        }
        Ok(())
    }

    /// Stores the trailing chunk and commits the stream length. Calling it
    /// again after success is a no-op returning the same length.
    pub async fn close(&mut self) -> Result<u64> {
        if self.closed {
            return Ok(self.written);
        }
        if !self.buf.is_empty() {
            self.store_buffered().await?;
        }
        self.commit_future().await?;
        self.mark_committed();
        Ok(self.written)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::WriterClosed(self.name.clone()));
        }
        Ok(())
    }

    async fn store_buffered(&mut self) -> Result<()> {
        self.store_future().await?;
        self.chunk_stored();
        Ok(())
    }

    pub(crate) fn is_full(&self) -> bool {
        self.buf.len() as u64 == self.layout.chunk_size
    }

    pub(crate) fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Copies as much of `src` as fits into the current chunk buffer.
    pub(crate) fn buffer(&mut self, src: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        let room = self.layout.chunk_size as usize - self.buf.len();
        let take = room.min(src.len());
        let part = &src[..take];
        self.buf.extend_from_slice(part);
        self.crc.update(part);
        self.written += take as u64;
        Ok(take)
    }

    /// Stores the buffered bytes as the next chunk. The buffer is kept until
    /// `chunk_stored` so a failed put loses nothing.
    pub(crate) fn store_future(&self) -> BoxFuture<'static, Result<()>> {
        let data = self.data.clone();
        let name = self.name.clone();
        let index = self.next_index;
        let chunk = Bytes::copy_from_slice(&self.buf);
        Box::pin(async move {
            trace!("put chunk {index} of {name} ({} bytes)", chunk.len());
            data.put(&name, index as Column, chunk).await
        })
    }

    pub(crate) fn chunk_stored(&mut self) {
        self.buf.clear();
        self.next_index += 1;
    }

    pub(crate) fn commit_future(&self) -> BoxFuture<'static, Result<()>> {
        let meta = self.meta.clone();
        let name = self.name.clone();
        let length = self.written;
        Box::pin(async move { meta.set_length(&name, length).await })
    }

    pub(crate) fn mark_committed(&mut self) {
        debug!(
            "committed stream {} ({} bytes, {} chunks)",
            self.name, self.written, self.next_index
        );
        self.closed = true;
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.closed && self.written > 0 {
            warn!(
                "stream {} dropped before close; {} bytes were never committed",
                self.name, self.written
            );
        }
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("name", &self.name)
            .field("written", &self.written)
            .field("next_index", &self.next_index)
            .field("closed", &self.closed)
            .finish()
    }
}
