//! Chunk layout: maps absolute stream positions to `(chunk index, offset)`.

use crate::error::{Error, Result};

/// Default fragment size for stream data.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
/// Default fragment size for the metadata namespace, whose values are tiny.
pub const DEFAULT_META_CHUNK_SIZE: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: u64,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE as u64,
        }
    }
}

impl ChunkLayout {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".into()));
        }
        Ok(Self {
            chunk_size: chunk_size as u64,
        })
    }

    #[inline]
    pub fn chunk_index_of(&self, pos: u64) -> u64 {
        pos / self.chunk_size
    }

    #[inline]
    pub fn within_chunk_offset(&self, pos: u64) -> u64 {
        pos % self.chunk_size
    }

    /// Number of chunks a stream of `len` bytes occupies; zero for an empty stream.
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size)
    }

    /// Bytes held by chunk `index` of a stream of `len` bytes (zero past the end).
    pub fn chunk_len(&self, len: u64, index: u64) -> usize {
        let start = index.saturating_mul(self.chunk_size);
        if start >= len {
            return 0;
        }
        (len - start).min(self.chunk_size) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(ChunkLayout::new(0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_index_and_offset() {
        let layout = ChunkLayout::new(8192).unwrap();
        assert_eq!(layout.chunk_index_of(0), 0);
        assert_eq!(layout.chunk_index_of(8191), 0);
        assert_eq!(layout.chunk_index_of(8192), 1);
        assert_eq!(layout.within_chunk_offset(8193), 1);
        assert_eq!(layout.within_chunk_offset(16384), 0);
    }

    #[test]
    fn test_chunk_count_and_tail() {
        let layout = ChunkLayout::new(8192).unwrap();
        assert_eq!(layout.chunk_count(0), 0);
        assert_eq!(layout.chunk_count(8192), 1);
        assert_eq!(layout.chunk_count(8193), 2);
        assert_eq!(layout.chunk_count(20000), 3);

        assert_eq!(layout.chunk_len(20000, 0), 8192);
        assert_eq!(layout.chunk_len(20000, 1), 8192);
        assert_eq!(layout.chunk_len(20000, 2), 3616);
        assert_eq!(layout.chunk_len(20000, 3), 0);
        assert_eq!(layout.chunk_len(0, 0), 0);
    }
}
