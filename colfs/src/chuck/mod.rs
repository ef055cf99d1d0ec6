//! Chunked streams (chuck)
//!
//! A stream is a named byte sequence cut into fixed-size chunks. Chunk `i`
//! lives at column `i` of the row named after the stream; every chunk but the
//! last is exactly `chunk_size` bytes. The committed length recorded in the
//! metadata store is the only authority on how many of those bytes count.
//!
//! Submodules:
//! - `chunk`: position arithmetic
//! - `writer`: sequential encoder, commits the length on close
//! - `reader`: random-access decoder with a one-chunk cache
pub mod chunk;
pub mod reader;
pub mod writer;

pub use chunk::ChunkLayout;
pub use reader::StreamReader;
pub use writer::StreamWriter;
