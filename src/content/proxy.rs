use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};

use super::memory::MemoryCas;
use super::{ByteStream, Fetcher, Pusher, ReadOnlyStorage};
use crate::descriptor::Descriptor;
use crate::errors::Error;

/// A fetcher wrapping a source with a write-through in-memory cache, so
/// manifest bytes fetched for successor extraction can be re-read for free
/// and pushed byte-identical to what was parsed.
pub struct CachingProxy<'a> {
    source: &'a dyn Fetcher,
    cache: MemoryCas,
    limit: u64,
    stop_caching: AtomicBool,
}

impl<'a> CachingProxy<'a> {
    /// Wrap a source. Content larger than `limit` bytes is never cached.
    pub fn new(source: &'a dyn Fetcher, limit: u64) -> CachingProxy<'a> {
        CachingProxy {
            source,
            cache: MemoryCas::new(),
            limit,
            stop_caching: AtomicBool::new(false),
        }
    }

    /// Toggle caching for subsequent fetches. Already cached content stays
    /// available either way.
    pub fn set_caching(&self, enabled: bool) {
        self.stop_caching.store(!enabled, Ordering::SeqCst);
    }

    pub fn is_cached(&self, target: &Descriptor) -> bool {
        self.cache.contains(target)
    }

    /// Cache-only read; fails with `NotFound` when the content was never
    /// fetched through the proxy.
    pub async fn fetch_cached(&self, target: &Descriptor) -> Result<ByteStream, Error> {
        self.cache.fetch(target).await
    }

    /// Populate the cache directly, e.g. with bytes a reference fetch
    /// already produced. Re-pushing cached content is a no-op.
    pub async fn cache_push(&self, expected: &Descriptor, content: ByteStream) -> Result<(), Error> {
        match self.cache.push(expected, content).await {
            Err(Error::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }
}

#[async_trait]
impl Fetcher for CachingProxy<'_> {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream, Error> {
        if let Ok(true) = self.cache.exists(target).await {
            log::trace!("serving `{}` from the proxy cache", target.digest);
            return self.cache.fetch(target).await;
        }
        let inner = self.source.fetch(target).await?;
        if self.stop_caching.load(Ordering::SeqCst) || target.size > self.limit {
            return Ok(inner);
        }
        Ok(Box::new(TeeReader::new(
            inner,
            target.clone(),
            self.cache.clone(),
        )))
    }
}

/// Mirrors everything read from the inner stream into a buffer and commits
/// the buffer to the cache once the stream ends cleanly. A read abandoned
/// before end-of-stream leaves the cache untouched.
struct TeeReader {
    inner: ByteStream,
    target: Descriptor,
    cache: MemoryCas,
    buffer: Vec<u8>,
    finished: bool,
}

impl TeeReader {
    fn new(inner: ByteStream, target: Descriptor, cache: MemoryCas) -> TeeReader {
        TeeReader {
            inner,
            target,
            cache,
            buffer: Vec::new(),
            finished: false,
        }
    }

    fn commit(&mut self) -> io::Result<()> {
        if self.buffer.len() as u64 != self.target.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                Error::MismatchedSize {
                    expected: self.target.size,
                    actual: self.buffer.len() as u64,
                },
            ));
        }
        let bytes = mem::take(&mut self.buffer);
        if let Err(error) = self.target.digest.verify(&bytes) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, error));
        }
        self.cache.put(&self.target, Bytes::from(bytes));
        Ok(())
    }
}

impl AsyncRead for TeeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let filled = &buf.filled()[before..];
                if filled.is_empty() {
                    if !this.finished {
                        this.finished = true;
                        if let Err(error) = this.commit() {
                            return Poll::Ready(Err(error));
                        }
                    }
                } else {
                    this.buffer.extend_from_slice(filled);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
