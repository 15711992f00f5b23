use async_trait::async_trait;

use crate::content::verify::fetch_verified;
use crate::content::Fetcher;
use crate::copy::MapRoot;
use crate::descriptor::{Descriptor, Platform};
use crate::errors::Error;
use crate::manifest::{
    Index, Manifest, MEDIA_TYPE_DOCKER_CONFIG, MEDIA_TYPE_DOCKER_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_IMAGE_INDEX,
    MEDIA_TYPE_IMAGE_MANIFEST,
};

/// Whether `got` satisfies the `want` platform. Architecture and OS must
/// agree; version, variant and OS features only constrain when `want`
/// specifies them.
pub fn matches(got: &Platform, want: &Platform) -> bool {
    if got.architecture != want.architecture || got.os != want.os {
        return false;
    }
    if let Some(want_version) = &want.os_version {
        if got.os_version.as_ref() != Some(want_version) {
            return false;
        }
    }
    if let Some(want_variant) = &want.variant {
        if got.variant.as_ref() != Some(want_variant) {
            return false;
        }
    }
    if let Some(want_features) = &want.os_features {
        let got_features = got.os_features.as_deref().unwrap_or_default();
        if !want_features
            .iter()
            .all(|feature| got_features.contains(feature))
        {
            return false;
        }
    }
    true
}

/// Select the manifest matching `target` from the given root. An index is
/// scanned in order; a single manifest is matched through its config blob.
pub async fn select_manifest(
    fetcher: &dyn Fetcher,
    root: &Descriptor,
    target: &Platform,
) -> Result<Descriptor, Error> {
    match root.media_type.as_str() {
        MEDIA_TYPE_IMAGE_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST => {
            let bytes = fetch_verified(fetcher, root).await?;
            let index: Index = serde_json::from_slice(&bytes)?;
            for descriptor in index.manifests {
                if let Some(platform) = &descriptor.platform {
                    if matches(platform, target) {
                        log::debug!(
                            "selected manifest `{}` for platform {}/{}",
                            descriptor.digest,
                            target.os,
                            target.architecture
                        );
                        return Ok(descriptor);
                    }
                }
            }
            Err(Error::NotFound(format!(
                "{}: no manifest matches platform {}/{}",
                root.digest, target.os, target.architecture
            )))
        }
        MEDIA_TYPE_IMAGE_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST => {
            let config_media_type = if root.media_type == MEDIA_TYPE_IMAGE_MANIFEST {
                MEDIA_TYPE_IMAGE_CONFIG
            } else {
                MEDIA_TYPE_DOCKER_CONFIG
            };
            let bytes = fetch_verified(fetcher, root).await?;
            let manifest: Manifest = serde_json::from_slice(&bytes)?;
            if manifest.config.media_type != config_media_type {
                return Err(Error::Unsupported(format!(
                    "config media type `{}` of manifest `{}`",
                    manifest.config.media_type, root.digest
                )));
            }
            let config_bytes = fetch_verified(fetcher, &manifest.config).await?;
            let platform: Platform = serde_json::from_slice(&config_bytes)?;
            if matches(&platform, target) {
                Ok(root.clone())
            } else {
                Err(Error::NotFound(format!(
                    "{}: platform {}/{} does not match {}/{}",
                    root.digest, platform.os, platform.architecture, target.os, target.architecture
                )))
            }
        }
        _ => Err(Error::Unsupported(format!(
            "media type `{}` for platform selection",
            root.media_type
        ))),
    }
}

/// Rewrites a copy root to the manifest matching the wanted platform.
pub struct PlatformSelector {
    platform: Platform,
}

impl PlatformSelector {
    pub fn new(platform: Platform) -> PlatformSelector {
        PlatformSelector { platform }
    }
}

#[async_trait]
impl MapRoot for PlatformSelector {
    async fn map_root(&self, fetcher: &dyn Fetcher, root: Descriptor) -> Result<Descriptor, Error> {
        select_manifest(fetcher, &root, &self.platform).await
    }
}
