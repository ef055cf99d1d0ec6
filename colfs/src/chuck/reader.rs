//! StreamReader: random-access reads over a committed stream.
//!
//! The length is read once from the metadata store when the reader opens.
//! Position `p` lives in chunk `p / chunk_size` at offset `p % chunk_size`.
//! Only the most recently fetched chunk is cached.

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::trace;

use super::chunk::ChunkLayout;
use crate::cadapter::{BackendRef, Column};
use crate::error::{Error, Result};
use crate::meta::MetaStore;

#[derive(Clone)]
pub struct StreamReader {
    name: String,
    data: BackendRef,
    layout: ChunkLayout,
    /// Committed length of the whole stream.
    stream_len: u64,
    /// Absolute offset of this view; non-zero only for slices.
    base: u64,
    /// Length of this view.
    len: u64,
    /// Cursor, relative to `base`.
    pos: u64,
    cached: Option<(u64, Bytes)>,
}

impl StreamReader {
    /// Fails with `NotFound` when `name` has no committed length.
    pub async fn open(name: &str, data: BackendRef, meta: &MetaStore) -> Result<Self> {
        let stream_len = meta.length(name).await?;
        let layout = ChunkLayout::new(data.chunk_size())?;
        trace!("open {name}: {stream_len} bytes");
        Ok(Self {
            name: name.to_string(),
            data,
            layout,
            stream_len,
            base: 0,
            len: stream_len,
            pos: 0,
            cached: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u64 {
        self.len
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Moves the cursor. Positions past the end are allowed; reads there
    /// return zero bytes.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Reads up to `buf.len()` bytes and returns how many were read; zero
    /// means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(index) = self.wanted_chunk() else {
                break;
            };
            if !self.has_chunk(index) {
                let chunk = self.fetch_chunk(index).await?;
                self.install_chunk(index, chunk)?;
            }
            let n = self.copy_cached(&mut buf[filled..]);
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Fills `buf` completely or fails with `UnexpectedEof`.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.read(buf).await?;
        if n < buf.len() {
            return Err(Error::UnexpectedEof {
                name: self.name.clone(),
                position: self.pos,
            });
        }
        Ok(())
    }

    /// Reads from the cursor to the end of the view.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.len.saturating_sub(self.pos) as usize;
        let mut out = vec![0u8; remaining];
        let n = self.read(&mut out).await?;
        out.truncate(n);
        Ok(out)
    }

    /// A view of `length` bytes starting at `offset` of this view, with its
    /// own cursor at zero.
    pub fn slice(&self, offset: u64, length: u64) -> Result<StreamReader> {
        let in_bounds = offset
            .checked_add(length)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(Error::InvalidSlice {
                name: self.name.clone(),
                offset,
                length,
                available: self.len,
            });
        }
        let mut view = self.clone();
        view.base = self.base + offset;
        view.len = length;
        view.pos = 0;
        Ok(view)
    }

    /// Chunk holding the byte under the cursor, `None` at end of view.
    pub(crate) fn wanted_chunk(&self) -> Option<u64> {
        if self.pos >= self.len {
            return None;
        }
        Some(self.layout.chunk_index_of(self.base + self.pos))
    }

    pub(crate) fn has_chunk(&self, index: u64) -> bool {
        matches!(&self.cached, Some((cached, _)) if *cached == index)
    }

    pub(crate) fn fetch_chunk(&self, index: u64) -> BoxFuture<'static, Result<Bytes>> {
        let data = self.data.clone();
        let name = self.name.clone();
        Box::pin(async move {
            trace!("get chunk {index} of {name}");
            data.get(&name, index as Column)
                .await?
                .ok_or(Error::MissingChunk { name, index })
        })
    }

    /// Caches `chunk` after checking it covers what the committed length
    /// promises for that index.
    pub(crate) fn install_chunk(&mut self, index: u64, chunk: Bytes) -> Result<()> {
        let expected = self.layout.chunk_len(self.stream_len, index);
        if chunk.len() < expected {
            return Err(Error::ShortChunk {
                name: self.name.clone(),
                index,
                expected,
                actual: chunk.len(),
            });
        }
        self.cached = Some((index, chunk));
        Ok(())
    }

    /// Copies from the cached chunk at the cursor, never past the view end
    /// or the chunk end, and advances the cursor.
    pub(crate) fn copy_cached(&mut self, out: &mut [u8]) -> usize {
        let abs = self.base + self.pos;
        let Some((index, chunk)) = &self.cached else {
            return 0;
        };
        if *index != self.layout.chunk_index_of(abs) || self.pos >= self.len {
            return 0;
        }
        let offset = self.layout.within_chunk_offset(abs) as usize;
        let in_chunk = (self.layout.chunk_size as usize - offset)
            .min(chunk.len().saturating_sub(offset));
        let in_view = (self.len - self.pos).min(usize::MAX as u64) as usize;
        let n = out.len().min(in_chunk).min(in_view);
        out[..n].copy_from_slice(&chunk[offset..offset + n]);
        self.pos += n as u64;
        n
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish()
    }
}
