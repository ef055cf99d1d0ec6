//! tokio I/O adapters over chunked streams.
//!
//! `AsyncStreamReader` drives [`StreamReader`] from `poll_read`, fetching at
//! most one chunk at a time. `AsyncStreamWriter` drives [`StreamWriter`]:
//! `poll_flush` only pushes completed chunks, since a partial chunk cannot be
//! stored before the stream ends, and `poll_shutdown` stores the tail and
//! commits the length.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

use crate::chuck::{StreamReader, StreamWriter};
use crate::error::{Error, Result};

pub struct AsyncStreamReader {
    inner: StreamReader,
    pending: Option<(u64, BoxFuture<'static, Result<Bytes>>)>,
}

impl AsyncStreamReader {
    pub fn new(inner: StreamReader) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    pub fn get_ref(&self) -> &StreamReader {
        &self.inner
    }

    pub fn into_inner(self) -> StreamReader {
        self.inner
    }
}

impl AsyncRead for AsyncStreamReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some((index, fut)) = this.pending.as_mut() {
                let index = *index;
                let fetched = ready!(fut.as_mut().poll(cx));
                this.pending = None;
                this.inner.install_chunk(index, fetched?)?;
            }
            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            let Some(index) = this.inner.wanted_chunk() else {
                return Poll::Ready(Ok(()));
            };
            if !this.inner.has_chunk(index) {
                this.pending = Some((index, this.inner.fetch_chunk(index)));
                continue;
            }
            let n = this.inner.copy_cached(buf.initialize_unfilled());
            buf.advance(n);
            return Poll::Ready(Ok(()));
        }
    }
}

impl AsyncSeek for AsyncStreamReader {
    fn start_seek(self: Pin<&mut Self>, position: io::SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let target = match position {
            io::SeekFrom::Start(pos) => Some(pos),
            io::SeekFrom::End(off) => this.inner.length().checked_add_signed(off),
            io::SeekFrom::Current(off) => this.inner.position().checked_add_signed(off),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid seek to {position:?} in {}", this.inner.name()),
            )
        })?;
        this.pending = None;
        this.inner.seek(target);
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.inner.position()))
    }
}

enum WriteState {
    Idle,
    Storing(BoxFuture<'static, Result<()>>),
    Committing(BoxFuture<'static, Result<()>>),
}

pub struct AsyncStreamWriter {
    inner: StreamWriter,
    state: WriteState,
}

impl AsyncStreamWriter {
    pub fn new(inner: StreamWriter) -> Self {
        Self {
            inner,
            state: WriteState::Idle,
        }
    }

    pub fn get_ref(&self) -> &StreamWriter {
        &self.inner
    }

    pub fn into_inner(self) -> StreamWriter {
        self.inner
    }

    /// Completes an in-flight chunk store, if any.
    fn poll_store(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let WriteState::Storing(fut) = &mut self.state {
            let res = ready!(fut.as_mut().poll(cx));
            self.state = WriteState::Idle;
            res?;
            self.inner.chunk_stored();
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for AsyncStreamWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_store(cx))?;
            if matches!(this.state, WriteState::Committing(_)) || this.inner.is_closed() {
                return Poll::Ready(Err(
                    Error::WriterClosed(this.inner.name().to_string()).into()
                ));
            }
            if this.inner.is_full() {
                this.state = WriteState::Storing(this.inner.store_future());
                continue;
            }
            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }
            return Poll::Ready(Ok(this.inner.buffer(buf)?));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_store(cx))?;
            if matches!(this.state, WriteState::Idle) && this.inner.is_full() {
                this.state = WriteState::Storing(this.inner.store_future());
                continue;
            }
            return Poll::Ready(Ok(()));
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_store(cx))?;
            if this.inner.is_closed() {
                return Poll::Ready(Ok(()));
            }
            match &mut this.state {
                WriteState::Committing(fut) => {
                    let res = ready!(fut.as_mut().poll(cx));
                    this.state = WriteState::Idle;
                    res?;
                    this.inner.mark_committed();
                    return Poll::Ready(Ok(()));
                }
                WriteState::Idle if this.inner.has_buffered() => {
                    this.state = WriteState::Storing(this.inner.store_future());
                }
                WriteState::Idle => {
                    this.state = WriteState::Committing(this.inner.commit_future());
                }
                WriteState::Storing(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::{ColumnBackend, InMemoryBackend};
    use crate::meta::MetaStore;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 241) as u8).collect()
    }

    fn setup(chunk_size: usize) -> (Arc<InMemoryBackend>, MetaStore) {
        (
            Arc::new(InMemoryBackend::new(chunk_size)),
            MetaStore::new(Arc::new(InMemoryBackend::new(256))),
        )
    }

    #[tokio::test]
    async fn test_async_write_commits_on_shutdown() {
        let (data, meta) = setup(8192);
        let writer = StreamWriter::new("x", data.clone(), meta.clone()).unwrap();
        let mut w = AsyncStreamWriter::new(writer);
        let payload = pattern(20000);
        w.write_all(&payload).await.unwrap();
        w.flush().await.unwrap();
        assert!(!meta.contains("x").await.unwrap());
        assert_eq!(data.value_lens("x").await, vec![8192, 8192]);

        w.shutdown().await.unwrap();
        assert!(w.get_ref().is_closed());
        assert_eq!(meta.length("x").await.unwrap(), 20000);
        assert_eq!(data.value_lens("x").await, vec![8192, 8192, 3616]);

        let err = w.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_async_empty_stream() {
        let (data, meta) = setup(16);
        let writer = StreamWriter::new("e", data.clone(), meta.clone()).unwrap();
        let mut w = AsyncStreamWriter::new(writer);
        w.shutdown().await.unwrap();
        assert_eq!(meta.length("e").await.unwrap(), 0);
        assert!(!data.has_key("e").await.unwrap());
    }

    #[tokio::test]
    async fn test_async_read_and_seek() {
        let (data, meta) = setup(16);
        let payload = pattern(100);
        let mut w = AsyncStreamWriter::new(StreamWriter::new("r", data.clone(), meta.clone()).unwrap());
        w.write_all(&payload).await.unwrap();
        w.shutdown().await.unwrap();

        let reader = StreamReader::open("r", data, &meta).await.unwrap();
        let mut r = AsyncStreamReader::new(reader);
        let mut all = Vec::new();
        r.read_to_end(&mut all).await.unwrap();
        assert_eq!(all, payload);

        assert_eq!(r.seek(io::SeekFrom::End(-10)).await.unwrap(), 90);
        let mut tail = Vec::new();
        r.read_to_end(&mut tail).await.unwrap();
        assert_eq!(tail, &payload[90..]);

        assert_eq!(r.seek(io::SeekFrom::Start(14)).await.unwrap(), 14);
        assert_eq!(r.seek(io::SeekFrom::Current(2)).await.unwrap(), 16);
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &payload[16..20]);

        let err = r.seek(io::SeekFrom::Current(-100)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_async_read_reports_missing_chunk() {
        let (data, meta) = setup(8);
        let mut w = AsyncStreamWriter::new(StreamWriter::new("m", data.clone(), meta.clone()).unwrap());
        w.write_all(&pattern(24)).await.unwrap();
        w.shutdown().await.unwrap();
        data.delete_column("m", 1).await.unwrap();

        let mut r = AsyncStreamReader::new(StreamReader::open("m", data, &meta).await.unwrap());
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
