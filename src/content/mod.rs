use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::descriptor::Descriptor;
use crate::errors::Error;

pub mod memory;
pub mod proxy;
pub(crate) mod verify;

/// Content handed out by a fetch or consumed by a push. Owned by the caller,
/// which must drain it to completion.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

pub(crate) fn cursor_stream(bytes: Bytes) -> ByteStream {
    Box::new(Cursor::new(bytes))
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the content addressed by the descriptor. The stream yields
    /// exactly `target.size` bytes hashing to `target.digest`.
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream, Error>;
}

#[async_trait]
pub trait Pusher: Send + Sync {
    /// Store the content read from `content` under the descriptor. Content
    /// that does not match the descriptor's size or digest is rejected.
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<(), Error>;
}

#[async_trait]
pub trait ReadOnlyStorage: Fetcher {
    async fn exists(&self, target: &Descriptor) -> Result<bool, Error>;
}

/// A content-addressable store: fetch, push and existence checks.
pub trait Storage: ReadOnlyStorage + Pusher {}

impl<T> Storage for T where T: ReadOnlyStorage + Pusher {}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve an opaque reference string to a descriptor.
    async fn resolve(&self, reference: &str) -> Result<Descriptor, Error>;
}

#[async_trait]
pub trait Tagger: Send + Sync {
    /// Bind a mutable name to the descriptor.
    async fn tag(&self, target: &Descriptor, reference: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait PredecessorFinder: Send + Sync {
    /// List the manifests whose subject is the given node.
    async fn predecessors(&self, node: &Descriptor) -> Result<Vec<Descriptor>, Error>;
}

/// Resolve and fetch in a single round-trip.
#[async_trait]
pub trait ReferenceFetcher: Send + Sync {
    async fn fetch_reference(&self, reference: &str)
        -> Result<(Descriptor, ByteStream), Error>;
}

/// Push content and bind a reference to it atomically.
#[async_trait]
pub trait ReferencePusher: Send + Sync {
    async fn push_reference(
        &self,
        expected: &Descriptor,
        content: ByteStream,
        reference: &str,
    ) -> Result<(), Error>;
}

/// Re-bind a reference on the backend without moving bytes.
#[async_trait]
pub trait ReferenceTagger: Send + Sync {
    async fn tag_reference(&self, src_reference: &str, dst_reference: &str) -> Result<(), Error>;
}

/// The read side of a target. Optional capabilities are discovered through
/// the probe methods; backends override the ones they can serve natively.
pub trait ReadOnlyTarget: ReadOnlyStorage + Resolver {
    fn reference_fetcher(&self) -> Option<&dyn ReferenceFetcher> {
        None
    }
}

/// A full storage backend: content store plus resolve and tag.
pub trait Target: Storage + ReadOnlyTarget + Tagger {
    fn reference_pusher(&self) -> Option<&dyn ReferencePusher> {
        None
    }

    fn reference_tagger(&self) -> Option<&dyn ReferenceTagger> {
        None
    }
}

pub trait ReadOnlyGraphStorage: ReadOnlyStorage + PredecessorFinder {}

impl<T> ReadOnlyGraphStorage for T where T: ReadOnlyStorage + PredecessorFinder {}

pub trait ReadOnlyGraphTarget: ReadOnlyTarget + PredecessorFinder {}

impl<T> ReadOnlyGraphTarget for T where T: ReadOnlyTarget + PredecessorFinder {}
