use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::descriptor::Descriptor;

pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const MEDIA_TYPE_ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";
pub const MEDIA_TYPE_EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";
pub const MEDIA_TYPE_UNKNOWN_CONFIG: &str = "application/vnd.unknown.config.v1+json";
pub const MEDIA_TYPE_UNKNOWN_ARTIFACT: &str = "application/vnd.unknown.artifact.v1";

/// Payload of the empty JSON sentinel blob.
pub const EMPTY_JSON_DATA: &[u8] = b"{}";

/// Descriptor of the canonical empty JSON blob (`{}`).
pub fn empty_json_descriptor() -> Descriptor {
    Descriptor::from_bytes(MEDIA_TYPE_EMPTY_JSON, EMPTY_JSON_DATA)
}

/// An OCI image manifest (or Docker v2.2 manifest): one config plus ordered
/// layers, optionally referring to a subject.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    #[serde(rename = "config")]
    pub config: Descriptor,

    #[serde(rename = "layers")]
    pub layers: Vec<Descriptor>,

    #[serde(rename = "subject", skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(rename = "annotations", skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// An image index (manifest list): an ordered list of manifest descriptors.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Index {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    #[serde(rename = "manifests")]
    pub manifests: Vec<Descriptor>,

    #[serde(rename = "subject", skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(rename = "annotations", skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// The experimental OCI 1.1 artifact manifest.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ArtifactManifest {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    #[serde(rename = "artifactType")]
    pub artifact_type: String,

    #[serde(rename = "blobs", default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<Descriptor>,

    #[serde(rename = "subject", skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    #[serde(rename = "annotations", skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}
