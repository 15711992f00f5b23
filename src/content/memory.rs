use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::verify::read_verified;
use super::{
    cursor_stream, ByteStream, Fetcher, PredecessorFinder, Pusher, ReadOnlyStorage,
    ReadOnlyTarget, Resolver, Tagger, Target,
};
use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::errors::Error;
use crate::manifest::{
    ArtifactManifest, Index, Manifest, MEDIA_TYPE_ARTIFACT_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
};

/// A digest-keyed blob map. Cheap to clone; clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryCas {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryCas {
    pub fn new() -> MemoryCas {
        MemoryCas::default()
    }

    pub(crate) fn get(&self, target: &Descriptor) -> Option<Bytes> {
        self.blobs
            .read()
            .unwrap()
            .get(&target.digest.to_string())
            .cloned()
    }

    pub(crate) fn contains(&self, target: &Descriptor) -> bool {
        self.blobs
            .read()
            .unwrap()
            .contains_key(&target.digest.to_string())
    }

    /// Insert already-verified bytes. Returns false when the digest was
    /// present, in which case the stored bytes are left untouched.
    pub(crate) fn put(&self, target: &Descriptor, bytes: Bytes) -> bool {
        let mut blobs = self.blobs.write().unwrap();
        let key = target.digest.to_string();
        if blobs.contains_key(&key) {
            return false;
        }
        blobs.insert(key, bytes);
        true
    }
}

#[async_trait]
impl Fetcher for MemoryCas {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream, Error> {
        match self.get(target) {
            Some(bytes) => Ok(cursor_stream(bytes)),
            None => Err(Error::NotFound(target.digest.to_string())),
        }
    }
}

#[async_trait]
impl Pusher for MemoryCas {
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<(), Error> {
        if self.contains(expected) {
            return Err(Error::AlreadyExists(expected.digest.to_string()));
        }
        let bytes = read_verified(expected, content).await?;
        if !self.put(expected, Bytes::from(bytes)) {
            return Err(Error::AlreadyExists(expected.digest.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadOnlyStorage for MemoryCas {
    async fn exists(&self, target: &Descriptor) -> Result<bool, Error> {
        Ok(self.contains(target))
    }
}

/// An in-memory target: full CAS plus tags and a referrer index, suitable as
/// either side of a copy.
#[derive(Default)]
pub struct MemoryStore {
    cas: MemoryCas,
    descriptors: RwLock<HashMap<String, Descriptor>>,
    tags: RwLock<HashMap<String, Descriptor>>,
    referrers: RwLock<HashMap<String, Vec<Descriptor>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Record the subject edge of a freshly pushed manifest so that
    /// `predecessors` can answer referrer queries. The referring descriptor
    /// carries the manifest's artifact type and annotations.
    fn index_manifest(&self, pushed: &Descriptor, bytes: &[u8]) {
        let (subject, artifact_type, annotations) = match pushed.media_type.as_str() {
            MEDIA_TYPE_IMAGE_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST => {
                let manifest: Manifest = match serde_json::from_slice(bytes) {
                    Ok(manifest) => manifest,
                    Err(_) => return,
                };
                let artifact_type = manifest
                    .artifact_type
                    .clone()
                    .or_else(|| Some(manifest.config.media_type.clone()));
                (manifest.subject, artifact_type, manifest.annotations)
            }
            MEDIA_TYPE_IMAGE_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST => {
                let index: Index = match serde_json::from_slice(bytes) {
                    Ok(index) => index,
                    Err(_) => return,
                };
                (index.subject, index.artifact_type, index.annotations)
            }
            MEDIA_TYPE_ARTIFACT_MANIFEST => {
                let manifest: ArtifactManifest = match serde_json::from_slice(bytes) {
                    Ok(manifest) => manifest,
                    Err(_) => return,
                };
                (
                    manifest.subject,
                    Some(manifest.artifact_type),
                    manifest.annotations,
                )
            }
            _ => return,
        };

        if let Some(subject) = subject {
            log::trace!(
                "indexing referrer `{}` of subject `{}`",
                pushed.digest,
                subject.digest
            );
            let mut referrer = pushed.clone();
            referrer.artifact_type = artifact_type;
            referrer.annotations = annotations;
            self.referrers
                .write()
                .unwrap()
                .entry(subject.digest.to_string())
                .or_insert_with(Vec::new)
                .push(referrer);
        }
    }
}

#[async_trait]
impl Fetcher for MemoryStore {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream, Error> {
        self.cas.fetch(target).await
    }
}

#[async_trait]
impl Pusher for MemoryStore {
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<(), Error> {
        if self.cas.contains(expected) {
            return Err(Error::AlreadyExists(expected.digest.to_string()));
        }
        let bytes = read_verified(expected, content).await?;
        if !self.cas.put(expected, Bytes::from(bytes.clone())) {
            return Err(Error::AlreadyExists(expected.digest.to_string()));
        }
        self.index_manifest(expected, &bytes);
        self.descriptors
            .write()
            .unwrap()
            .entry(expected.digest.to_string())
            .or_insert_with(|| expected.clone());
        Ok(())
    }
}

#[async_trait]
impl ReadOnlyStorage for MemoryStore {
    async fn exists(&self, target: &Descriptor) -> Result<bool, Error> {
        self.cas.exists(target).await
    }
}

#[async_trait]
impl Resolver for MemoryStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor, Error> {
        if let Some(descriptor) = self.tags.read().unwrap().get(reference) {
            return Ok(descriptor.clone());
        }
        if reference.contains(':') {
            let digest = Digest::try_from(reference)
                .map_err(|_| Error::InvalidReference(reference.to_string()))?;
            if let Some(descriptor) = self.descriptors.read().unwrap().get(&digest.to_string()) {
                return Ok(descriptor.clone());
            }
        }
        Err(Error::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl Tagger for MemoryStore {
    async fn tag(&self, target: &Descriptor, reference: &str) -> Result<(), Error> {
        if reference.is_empty() {
            return Err(Error::MissingReference);
        }
        if !self.cas.contains(target) {
            return Err(Error::NotFound(target.digest.to_string()));
        }
        self.tags
            .write()
            .unwrap()
            .insert(reference.to_string(), target.clone());
        Ok(())
    }
}

#[async_trait]
impl PredecessorFinder for MemoryStore {
    async fn predecessors(&self, node: &Descriptor) -> Result<Vec<Descriptor>, Error> {
        Ok(self
            .referrers
            .read()
            .unwrap()
            .get(&node.digest.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

impl ReadOnlyTarget for MemoryStore {}

impl Target for MemoryStore {}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::manifest::MEDIA_TYPE_IMAGE_CONFIG;

    async fn push_blob(store: &MemoryStore, media_type: &str, bytes: &[u8]) -> Descriptor {
        let descriptor = Descriptor::from_bytes(media_type, bytes);
        store
            .push(&descriptor, cursor_stream(Bytes::copy_from_slice(bytes)))
            .await
            .unwrap();
        descriptor
    }

    #[tokio::test]
    async fn test_push_fetch_round_trip() {
        let store = MemoryStore::new();
        let descriptor = push_blob(&store, "application/vnd.test", b"payload").await;

        assert!(store.exists(&descriptor).await.unwrap());
        let mut content = store.fetch(&descriptor).await.unwrap();
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[tokio::test]
    async fn test_push_rejects_mismatched_digest() {
        let store = MemoryStore::new();
        let descriptor = Descriptor::from_bytes("application/vnd.test", b"payload");
        let result = store
            .push(&descriptor, cursor_stream(Bytes::from_static(b"other")))
            .await;
        assert!(result.is_err());
        assert!(!store.exists(&descriptor).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_push_already_exists() {
        let store = MemoryStore::new();
        let descriptor = push_blob(&store, "application/vnd.test", b"payload").await;
        let result = store
            .push(&descriptor, cursor_stream(Bytes::from_static(b"payload")))
            .await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_tag_and_resolve() {
        let store = MemoryStore::new();
        let descriptor = push_blob(&store, "application/vnd.test", b"payload").await;

        store.tag(&descriptor, "latest").await.unwrap();
        assert_eq!(store.resolve("latest").await.unwrap(), descriptor);
        assert_eq!(
            store
                .resolve(&descriptor.digest.to_string())
                .await
                .unwrap(),
            descriptor
        );
    }

    #[tokio::test]
    async fn test_tag_unknown_content() {
        let store = MemoryStore::new();
        let descriptor = Descriptor::from_bytes("application/vnd.test", b"missing");
        assert!(matches!(
            store.tag(&descriptor, "latest").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tag_empty_reference() {
        let store = MemoryStore::new();
        let descriptor = push_blob(&store, "application/vnd.test", b"payload").await;
        assert!(matches!(
            store.tag(&descriptor, "").await,
            Err(Error::MissingReference)
        ));
    }

    #[tokio::test]
    async fn test_resolve_malformed_digest_reference() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.resolve("sha256:").await,
            Err(Error::InvalidReference(_))
        ));
        assert!(matches!(
            store.resolve("unknown").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_predecessors_carry_referrer_metadata() {
        let store = MemoryStore::new();
        let subject = push_blob(&store, MEDIA_TYPE_IMAGE_MANIFEST, b"{\"schemaVersion\":2,\"config\":{\"mediaType\":\"application/vnd.oci.image.config.v1+json\",\"digest\":\"sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a\",\"size\":2},\"layers\":[]}").await;

        let mut annotations = BTreeMap::new();
        annotations.insert("bar".to_string(), "blackred".to_string());
        let referrer = Manifest {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_MANIFEST.to_string()),
            artifact_type: Some("application/vnd.example.signature.v1".to_string()),
            config: Descriptor::from_bytes(MEDIA_TYPE_IMAGE_CONFIG, b"{}"),
            layers: Vec::new(),
            subject: Some(subject.clone()),
            annotations: Some(annotations.clone()),
        };
        let bytes = serde_json::to_vec(&referrer).unwrap();
        let referrer_descriptor = push_blob(&store, MEDIA_TYPE_IMAGE_MANIFEST, &bytes).await;

        let predecessors = store.predecessors(&subject).await.unwrap();
        assert_eq!(predecessors.len(), 1);
        assert!(predecessors[0].same_content(&referrer_descriptor));
        assert_eq!(
            predecessors[0].artifact_type.as_deref(),
            Some("application/vnd.example.signature.v1")
        );
        assert_eq!(predecessors[0].annotations, Some(annotations));

        let unrelated = push_blob(&store, "application/vnd.test", b"unrelated").await;
        assert!(store.predecessors(&unrelated).await.unwrap().is_empty());
    }
}
