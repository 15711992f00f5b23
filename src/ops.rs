use bytes::Bytes;

use crate::content::verify::read_verified;
use crate::content::{
    cursor_stream, ByteStream, Fetcher, Pusher, ReadOnlyTarget, ReferenceFetcher, ReferencePusher,
    ReferenceTagger, Resolver, Tagger, Target,
};
use crate::descriptor::{Descriptor, Platform};
use crate::errors::Error;
use crate::platform::select_manifest;

pub const DEFAULT_MAX_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Default)]
pub struct ResolveOptions {
    /// When set, resolve through the index to the matching platform.
    pub target_platform: Option<Platform>,
}

#[derive(Default)]
pub struct FetchOptions {
    pub resolve: ResolveOptions,
}

pub struct FetchBytesOptions {
    pub fetch: FetchOptions,
    /// Upper bound on the fetched size; `0` lifts the bound.
    pub max_bytes: u64,
}

impl Default for FetchBytesOptions {
    fn default() -> FetchBytesOptions {
        FetchBytesOptions {
            fetch: FetchOptions::default(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Resolve a reference to a descriptor, optionally narrowing to a platform.
pub async fn resolve<T>(
    target: &T,
    reference: &str,
    opts: ResolveOptions,
) -> Result<Descriptor, Error>
where
    T: ReadOnlyTarget,
{
    let descriptor = target.resolve(reference).await?;
    match &opts.target_platform {
        Some(platform) => select_manifest(target, &descriptor, platform).await,
        None => Ok(descriptor),
    }
}

/// Resolve and fetch. Without a platform filter a source capable of
/// reference fetching serves both in one round-trip.
pub async fn fetch<T>(
    target: &T,
    reference: &str,
    opts: FetchOptions,
) -> Result<(Descriptor, ByteStream), Error>
where
    T: ReadOnlyTarget,
{
    if opts.resolve.target_platform.is_none() {
        if let Some(fetcher) = target.reference_fetcher() {
            return fetcher.fetch_reference(reference).await;
        }
    }
    let descriptor = resolve(target, reference, opts.resolve).await?;
    let content = target.fetch(&descriptor).await?;
    Ok((descriptor, content))
}

/// Fetch fully into memory, bounded by `max_bytes` and verified against the
/// descriptor.
pub async fn fetch_bytes<T>(
    target: &T,
    reference: &str,
    opts: FetchBytesOptions,
) -> Result<(Descriptor, Vec<u8>), Error>
where
    T: ReadOnlyTarget,
{
    let (descriptor, content) = fetch(target, reference, opts.fetch).await?;
    if opts.max_bytes > 0 && descriptor.size > opts.max_bytes {
        return Err(Error::SizeExceedsLimit {
            size: descriptor.size,
            limit: opts.max_bytes,
        });
    }
    let bytes = read_verified(&descriptor, content).await?;
    Ok((descriptor, bytes))
}

/// Push raw bytes, deriving their descriptor from the content.
pub async fn push_bytes<P>(pusher: &P, media_type: &str, bytes: &[u8]) -> Result<Descriptor, Error>
where
    P: Pusher,
{
    let descriptor = Descriptor::from_bytes(media_type, bytes);
    pusher
        .push(&descriptor, cursor_stream(Bytes::copy_from_slice(bytes)))
        .await?;
    Ok(descriptor)
}

/// Resolve `src_reference` and additionally bind every destination
/// reference to it.
pub async fn tag_n<T>(
    target: &T,
    src_reference: &str,
    dst_references: &[&str],
) -> Result<Descriptor, Error>
where
    T: Target,
{
    if dst_references.is_empty() {
        return Err(Error::MissingReference);
    }

    if let (Some(fetcher), Some(pusher)) = (target.reference_fetcher(), target.reference_pusher())
    {
        // re-push the manifest bytes under each new reference, saving the
        // separate resolve and tag round-trips
        let (descriptor, content) = fetcher.fetch_reference(src_reference).await?;
        if descriptor.size > DEFAULT_MAX_BYTES {
            return Err(Error::SizeExceedsLimit {
                size: descriptor.size,
                limit: DEFAULT_MAX_BYTES,
            });
        }
        let bytes = read_verified(&descriptor, content).await?;
        for reference in dst_references {
            let content = cursor_stream(Bytes::copy_from_slice(&bytes));
            match pusher.push_reference(&descriptor, content, reference).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(error) => return Err(error),
            }
        }
        return Ok(descriptor);
    }

    let descriptor = target.resolve(src_reference).await?;
    for reference in dst_references {
        target.tag(&descriptor, reference).await?;
    }
    Ok(descriptor)
}

/// Re-bind a single reference, delegating to the backend when it can retag
/// server-side.
pub async fn tag<T>(target: &T, src_reference: &str, dst_reference: &str) -> Result<Descriptor, Error>
where
    T: Target,
{
    if let Some(tagger) = target.reference_tagger() {
        tagger.tag_reference(src_reference, dst_reference).await?;
        return target.resolve(dst_reference).await;
    }
    tag_n(target, src_reference, &[dst_reference]).await
}

/// Push raw bytes and bind every reference to them.
pub async fn tag_bytes_n<T>(
    target: &T,
    media_type: &str,
    bytes: &[u8],
    references: &[&str],
) -> Result<Descriptor, Error>
where
    T: Target,
{
    if references.is_empty() {
        return Err(Error::MissingReference);
    }
    let descriptor = Descriptor::from_bytes(media_type, bytes);

    if let Some(pusher) = target.reference_pusher() {
        for reference in references {
            let content = cursor_stream(Bytes::copy_from_slice(bytes));
            match pusher.push_reference(&descriptor, content, reference).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(error) => return Err(error),
            }
        }
        return Ok(descriptor);
    }

    match target
        .push(&descriptor, cursor_stream(Bytes::copy_from_slice(bytes)))
        .await
    {
        Ok(()) | Err(Error::AlreadyExists(_)) => {}
        Err(error) => return Err(error),
    }
    for reference in references {
        target.tag(&descriptor, reference).await?;
    }
    Ok(descriptor)
}

pub async fn tag_bytes<T>(
    target: &T,
    media_type: &str,
    bytes: &[u8],
    reference: &str,
) -> Result<Descriptor, Error>
where
    T: Target,
{
    tag_bytes_n(target, media_type, bytes, &[reference]).await
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::content::memory::MemoryStore;
    use crate::content::{
        Fetcher, ReadOnlyStorage, ReferenceTagger, Resolver, Tagger,
    };
    use crate::manifest::{Index, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST};

    #[tokio::test]
    async fn test_push_bytes_then_fetch_bytes() {
        let store = MemoryStore::new();
        let descriptor = push_bytes(&store, "application/vnd.test", b"round trip")
            .await
            .unwrap();
        store.tag(&descriptor, "latest").await.unwrap();

        let (resolved, bytes) = fetch_bytes(&store, "latest", FetchBytesOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved, descriptor);
        assert_eq!(bytes, b"round trip");
    }

    #[tokio::test]
    async fn test_fetch_bytes_enforces_the_size_limit() {
        let store = MemoryStore::new();
        let descriptor = push_bytes(&store, "application/vnd.test", b"too large for the cap")
            .await
            .unwrap();
        store.tag(&descriptor, "latest").await.unwrap();

        let opts = FetchBytesOptions {
            fetch: FetchOptions::default(),
            max_bytes: 4,
        };
        let result = fetch_bytes(&store, "latest", opts).await;
        assert!(matches!(result, Err(Error::SizeExceedsLimit { .. })));
    }

    #[tokio::test]
    async fn test_fetch_streams_the_resolved_content() {
        let store = MemoryStore::new();
        let descriptor = push_bytes(&store, "application/vnd.test", b"streamed")
            .await
            .unwrap();
        store.tag(&descriptor, "latest").await.unwrap();

        let (resolved, mut content) = fetch(&store, "latest", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved, descriptor);
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"streamed");
    }

    #[tokio::test]
    async fn test_resolve_with_platform_filter() {
        let store = MemoryStore::new();
        let mut arc1 = Descriptor::from_bytes(MEDIA_TYPE_IMAGE_MANIFEST, b"manifest one");
        arc1.platform = Some(Platform::new("arc1", "os1"));
        let mut arc2 = Descriptor::from_bytes(MEDIA_TYPE_IMAGE_MANIFEST, b"manifest two");
        arc2.platform = Some(Platform::new("arc2", "os2"));
        let index = Index {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_INDEX.to_string()),
            artifact_type: None,
            manifests: vec![arc1.clone(), arc2],
            subject: None,
            annotations: None,
        };
        let bytes = serde_json::to_vec(&index).unwrap();
        let descriptor = push_bytes(&store, MEDIA_TYPE_IMAGE_INDEX, &bytes)
            .await
            .unwrap();
        store.tag(&descriptor, "ref").await.unwrap();

        let opts = ResolveOptions {
            target_platform: Some(Platform::new("arc1", "os1")),
        };
        let selected = resolve(&store, "ref", opts).await.unwrap();
        assert!(selected.same_content(&arc1));

        // mixing the architecture of one entry with the os of the other
        let opts = ResolveOptions {
            target_platform: Some(Platform::new("arc1", "os2")),
        };
        assert!(matches!(
            resolve(&store, "ref", opts).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tag_n_requires_a_destination() {
        let store = MemoryStore::new();
        let result = tag_n(&store, "latest", &[]).await;
        assert!(matches!(result, Err(Error::MissingReference)));
    }

    #[tokio::test]
    async fn test_tag_n_binds_every_reference() {
        let store = MemoryStore::new();
        let descriptor = push_bytes(&store, "application/vnd.test", b"to be tagged")
            .await
            .unwrap();
        store.tag(&descriptor, "v1").await.unwrap();

        let tagged = tag_n(&store, "v1", &["latest", "stable"]).await.unwrap();
        assert_eq!(tagged, descriptor);
        assert_eq!(store.resolve("latest").await.unwrap(), descriptor);
        assert_eq!(store.resolve("stable").await.unwrap(), descriptor);
    }

    #[tokio::test]
    async fn test_tag_bytes_is_idempotent() {
        let store = MemoryStore::new();
        let first = tag_bytes(&store, "application/vnd.test", b"same bytes", "one")
            .await
            .unwrap();
        let second = tag_bytes(&store, "application/vnd.test", b"same bytes", "two")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.resolve("one").await.unwrap(), first);
        assert_eq!(store.resolve("two").await.unwrap(), first);
    }

    struct RetaggingStore {
        inner: MemoryStore,
        retags: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for RetaggingStore {
        async fn fetch(&self, target: &Descriptor) -> Result<ByteStream, Error> {
            self.inner.fetch(target).await
        }
    }

    #[async_trait]
    impl Pusher for RetaggingStore {
        async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<(), Error> {
            self.inner.push(expected, content).await
        }
    }

    #[async_trait]
    impl ReadOnlyStorage for RetaggingStore {
        async fn exists(&self, target: &Descriptor) -> Result<bool, Error> {
            self.inner.exists(target).await
        }
    }

    #[async_trait]
    impl Resolver for RetaggingStore {
        async fn resolve(&self, reference: &str) -> Result<Descriptor, Error> {
            self.inner.resolve(reference).await
        }
    }

    #[async_trait]
    impl Tagger for RetaggingStore {
        async fn tag(&self, target: &Descriptor, reference: &str) -> Result<(), Error> {
            self.inner.tag(target, reference).await
        }
    }

    #[async_trait]
    impl ReferenceTagger for RetaggingStore {
        async fn tag_reference(
            &self,
            src_reference: &str,
            dst_reference: &str,
        ) -> Result<(), Error> {
            self.retags
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let descriptor = self.inner.resolve(src_reference).await?;
            self.inner.tag(&descriptor, dst_reference).await
        }
    }

    impl ReadOnlyTarget for RetaggingStore {}

    impl Target for RetaggingStore {
        fn reference_tagger(&self) -> Option<&dyn ReferenceTagger> {
            Some(self)
        }
    }

    #[tokio::test]
    async fn test_tag_prefers_a_server_side_retag() {
        let store = RetaggingStore {
            inner: MemoryStore::new(),
            retags: std::sync::atomic::AtomicUsize::new(0),
        };
        let descriptor = push_bytes(&store, "application/vnd.test", b"retagged")
            .await
            .unwrap();
        store.inner.tag(&descriptor, "v1").await.unwrap();

        let tagged = tag(&store, "v1", "latest").await.unwrap();
        assert_eq!(tagged, descriptor);
        assert_eq!(store.retags.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.inner.resolve("latest").await.unwrap(), descriptor);
    }
}
