//! Copy content-addressed graphs of OCI artifacts between storage backends.
//!
//! Backends implement a small set of capability traits (`Fetcher`, `Pusher`,
//! `Resolver`, ...); the copy engine walks manifests, indexes and artifact
//! manifests by digest with bounded parallelism and replicates every
//! reachable blob exactly once.

mod copy;
mod ops;

pub mod content;
pub mod descriptor;
pub mod digest;
pub mod errors;
pub mod graph;
pub mod manifest;
pub mod pack;
pub mod platform;

pub use crate::content::memory::MemoryStore;
pub use crate::content::proxy::CachingProxy;
pub use crate::content::{
    ByteStream, Fetcher, PredecessorFinder, Pusher, ReadOnlyGraphStorage, ReadOnlyGraphTarget,
    ReadOnlyStorage, ReadOnlyTarget, ReferenceFetcher, ReferencePusher, ReferenceTagger, Resolver,
    Storage, Tagger, Target,
};
pub use crate::copy::extended::{
    extended_copy, extended_copy_graph, ExtendedCopyGraphOptions, ExtendedCopyOptions,
    FindPredecessors,
};
pub use crate::copy::{
    copy, copy_graph, CopyDecision, CopyGraphOptions, CopyHook, CopyOptions, MapRoot, PreCopyHook,
    DEFAULT_CONCURRENCY, DEFAULT_MAX_METADATA_BYTES,
};
pub use crate::descriptor::{validate_media_type, Descriptor, Platform};
pub use crate::digest::{Algorithm, Digest};
pub use crate::errors::{CopyError, CopyOrigin, Error};
pub use crate::ops::{
    fetch, fetch_bytes, push_bytes, resolve, tag, tag_bytes, tag_bytes_n, tag_n,
    FetchBytesOptions, FetchOptions, ResolveOptions, DEFAULT_MAX_BYTES,
};
pub use crate::pack::{
    pack, pack_manifest, PackManifestOptions, PackManifestVersion, PackOptions,
    ANNOTATION_ARTIFACT_CREATED, ANNOTATION_IMAGE_CREATED,
};
