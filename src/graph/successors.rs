use crate::content::verify::fetch_verified;
use crate::content::Fetcher;
use crate::descriptor::Descriptor;
use crate::errors::Error;
use crate::manifest::{
    ArtifactManifest, Index, Manifest, MEDIA_TYPE_ARTIFACT_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
};

/// Extract the direct children of a node. Image manifests yield the config
/// followed by the layers, indexes yield their manifest list, artifact
/// manifests yield their blobs; a subject comes last. Non-manifest media
/// types have no successors.
pub async fn successors(
    fetcher: &dyn Fetcher,
    node: &Descriptor,
) -> Result<Vec<Descriptor>, Error> {
    match node.media_type.as_str() {
        MEDIA_TYPE_IMAGE_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST => {
            let bytes = fetch_verified(fetcher, node).await?;
            let manifest: Manifest = serde_json::from_slice(&bytes)?;
            let mut nodes = Vec::with_capacity(manifest.layers.len() + 2);
            nodes.push(manifest.config);
            nodes.extend(manifest.layers);
            if let Some(subject) = manifest.subject {
                nodes.push(subject);
            }
            Ok(nodes)
        }
        MEDIA_TYPE_IMAGE_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST => {
            let bytes = fetch_verified(fetcher, node).await?;
            let index: Index = serde_json::from_slice(&bytes)?;
            let mut nodes = index.manifests;
            if let Some(subject) = index.subject {
                nodes.push(subject);
            }
            Ok(nodes)
        }
        MEDIA_TYPE_ARTIFACT_MANIFEST => {
            let bytes = fetch_verified(fetcher, node).await?;
            let manifest: ArtifactManifest = serde_json::from_slice(&bytes)?;
            let mut nodes = manifest.blobs;
            if let Some(subject) = manifest.subject {
                nodes.push(subject);
            }
            Ok(nodes)
        }
        _ => Ok(Vec::new()),
    }
}
