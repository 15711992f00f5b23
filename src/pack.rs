use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::content::{cursor_stream, Pusher};
use crate::descriptor::{validate_media_type, Descriptor};
use crate::errors::Error;
use crate::manifest::{
    empty_json_descriptor, ArtifactManifest, Manifest, EMPTY_JSON_DATA,
    MEDIA_TYPE_ARTIFACT_MANIFEST, MEDIA_TYPE_EMPTY_JSON, MEDIA_TYPE_IMAGE_MANIFEST,
    MEDIA_TYPE_UNKNOWN_ARTIFACT, MEDIA_TYPE_UNKNOWN_CONFIG,
};

pub const ANNOTATION_IMAGE_CREATED: &str = "org.opencontainers.image.created";
pub const ANNOTATION_ARTIFACT_CREATED: &str = "org.opencontainers.artifact.created";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackManifestVersion {
    /// OCI image manifest 1.0: no subject, artifact type carried as the
    /// config media type.
    V1_0,
    /// OCI image manifest 1.1: top-level artifact type, empty-JSON config and
    /// layer conventions.
    V1_1,
}

#[derive(Default)]
pub struct PackManifestOptions {
    pub subject: Option<Descriptor>,
    pub manifest_annotations: BTreeMap<String, String>,
    pub config_descriptor: Option<Descriptor>,
    pub layers: Option<Vec<Descriptor>>,
}

/// Assemble and push an image manifest, returning its descriptor with the
/// artifact type and annotations filled in, ready for tagging.
pub async fn pack_manifest<P>(
    pusher: &P,
    version: PackManifestVersion,
    artifact_type: &str,
    opts: PackManifestOptions,
) -> Result<Descriptor, Error>
where
    P: Pusher,
{
    match version {
        PackManifestVersion::V1_0 => pack_manifest_v1_0(pusher, artifact_type, opts).await,
        PackManifestVersion::V1_1 => pack_manifest_v1_1(pusher, artifact_type, opts).await,
    }
}

async fn pack_manifest_v1_0(
    pusher: &dyn Pusher,
    artifact_type: &str,
    opts: PackManifestOptions,
) -> Result<Descriptor, Error> {
    if opts.subject.is_some() {
        return Err(Error::Unsupported(
            "subject is not supported for manifest version 1.0".to_string(),
        ));
    }
    let annotations = ensure_created(opts.manifest_annotations, ANNOTATION_IMAGE_CREATED)?;

    let config = match opts.config_descriptor {
        Some(config) => {
            config.validate()?;
            config
        }
        None => {
            let media_type = if artifact_type.is_empty() {
                MEDIA_TYPE_UNKNOWN_CONFIG
            } else {
                artifact_type
            };
            validate_media_type(media_type)?;
            let config = Descriptor::from_bytes(media_type, EMPTY_JSON_DATA);
            push_if_absent(pusher, &config, EMPTY_JSON_DATA).await?;
            config
        }
    };

    let manifest = Manifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_IMAGE_MANIFEST.to_string()),
        artifact_type: None,
        config: config.clone(),
        layers: opts.layers.unwrap_or_default(),
        subject: None,
        annotations: Some(annotations.clone()),
    };
    push_packed(
        pusher,
        &manifest,
        MEDIA_TYPE_IMAGE_MANIFEST,
        Some(config.media_type),
        annotations,
    )
    .await
}

async fn pack_manifest_v1_1(
    pusher: &dyn Pusher,
    artifact_type: &str,
    opts: PackManifestOptions,
) -> Result<Descriptor, Error> {
    let config_carries_type = opts
        .config_descriptor
        .as_ref()
        .map(|config| config.media_type != MEDIA_TYPE_EMPTY_JSON)
        .unwrap_or(false);
    if artifact_type.is_empty() && !config_carries_type {
        return Err(Error::MissingArtifactType);
    }
    if !artifact_type.is_empty() {
        validate_media_type(artifact_type)?;
    }
    let annotations = ensure_created(opts.manifest_annotations, ANNOTATION_IMAGE_CREATED)?;

    let config = match opts.config_descriptor {
        Some(config) => {
            config.validate()?;
            config
        }
        None => {
            let config = empty_json_descriptor();
            push_if_absent(pusher, &config, EMPTY_JSON_DATA).await?;
            config
        }
    };

    let layers = match opts.layers {
        Some(layers) if !layers.is_empty() => layers,
        _ => {
            // at least one layer entry is required; the empty blob stands in
            let layer = empty_json_descriptor();
            push_if_absent(pusher, &layer, EMPTY_JSON_DATA).await?;
            vec![layer]
        }
    };

    let artifact_type = if artifact_type.is_empty() {
        None
    } else {
        Some(artifact_type.to_string())
    };
    let manifest = Manifest {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_IMAGE_MANIFEST.to_string()),
        artifact_type: artifact_type.clone(),
        config,
        layers,
        subject: opts.subject,
        annotations: Some(annotations.clone()),
    };
    push_packed(
        pusher,
        &manifest,
        MEDIA_TYPE_IMAGE_MANIFEST,
        artifact_type,
        annotations,
    )
    .await
}

#[derive(Default)]
pub struct PackOptions {
    pub subject: Option<Descriptor>,
    pub manifest_annotations: BTreeMap<String, String>,
}

/// Assemble and push a pre-1.1 artifact manifest over the given blobs.
pub async fn pack<P>(
    pusher: &P,
    artifact_type: &str,
    blobs: Vec<Descriptor>,
    opts: PackOptions,
) -> Result<Descriptor, Error>
where
    P: Pusher,
{
    let artifact_type = if artifact_type.is_empty() {
        MEDIA_TYPE_UNKNOWN_ARTIFACT
    } else {
        artifact_type
    };
    validate_media_type(artifact_type)?;
    let annotations = ensure_created(opts.manifest_annotations, ANNOTATION_ARTIFACT_CREATED)?;

    let manifest = ArtifactManifest {
        media_type: MEDIA_TYPE_ARTIFACT_MANIFEST.to_string(),
        artifact_type: artifact_type.to_string(),
        blobs,
        subject: opts.subject,
        annotations: Some(annotations.clone()),
    };
    push_packed(
        pusher,
        &manifest,
        MEDIA_TYPE_ARTIFACT_MANIFEST,
        Some(artifact_type.to_string()),
        annotations,
    )
    .await
}

/// Validate the created-time annotation, inserting the current UTC time when
/// the caller did not provide one.
fn ensure_created(
    mut annotations: BTreeMap<String, String>,
    key: &str,
) -> Result<BTreeMap<String, String>, Error> {
    match annotations.get(key) {
        Some(value) => {
            DateTime::parse_from_rfc3339(value)
                .map_err(|_| Error::InvalidDateTimeFormat(value.clone()))?;
        }
        None => {
            annotations.insert(
                key.to_string(),
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
    }
    Ok(annotations)
}

async fn push_packed<T>(
    pusher: &dyn Pusher,
    manifest: &T,
    media_type: &str,
    artifact_type: Option<String>,
    annotations: BTreeMap<String, String>,
) -> Result<Descriptor, Error>
where
    T: Serialize,
{
    let bytes = serde_json::to_vec(manifest)?;
    let mut descriptor = Descriptor::from_bytes(media_type, &bytes);
    descriptor.artifact_type = artifact_type;
    descriptor.annotations = Some(annotations);
    push_if_absent(pusher, &descriptor, &bytes).await?;
    log::debug!("packed manifest `{}`", descriptor.digest);
    Ok(descriptor)
}

async fn push_if_absent(
    pusher: &dyn Pusher,
    expected: &Descriptor,
    bytes: &[u8],
) -> Result<(), Error> {
    match pusher
        .push(expected, cursor_stream(Bytes::copy_from_slice(bytes)))
        .await
    {
        Err(Error::AlreadyExists(_)) => Ok(()),
        other => other,
    }
}
