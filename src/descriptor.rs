use std::collections::BTreeMap;

use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::errors::Error;

const MEDIA_TYPE_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*/[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]*$";

/// The universal content handle: identifies a blob by digest, size and media
/// type, with optional routing metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    #[serde(rename = "digest")]
    pub digest: Digest,

    #[serde(rename = "size")]
    pub size: u64,

    #[serde(rename = "urls", skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    #[serde(rename = "annotations", skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(rename = "platform", skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

impl Descriptor {
    /// Descriptor for the given bytes, digested with the default algorithm.
    pub fn from_bytes<M>(media_type: M, bytes: &[u8]) -> Descriptor
    where
        M: Into<String>,
    {
        Descriptor {
            media_type: media_type.into(),
            digest: Digest::from_bytes(bytes),
            size: bytes.len() as u64,
            urls: None,
            annotations: None,
            platform: None,
            artifact_type: None,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_media_type(&self.media_type)?;
        if self.digest.encoded.is_empty() {
            return Err(Error::InvalidDigest(self.digest.to_string()));
        }
        Ok(())
    }

    /// Two descriptors address the same content when digest, size and media
    /// type all agree.
    pub fn same_content(&self, other: &Descriptor) -> bool {
        self.digest == other.digest
            && self.size == other.size
            && self.media_type == other.media_type
    }

    pub(crate) fn content_key(&self) -> (String, u64, String) {
        (self.digest.to_string(), self.size, self.media_type.clone())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    #[serde(rename = "architecture")]
    pub architecture: String,

    #[serde(rename = "os")]
    pub os: String,

    #[serde(rename = "os.version", skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    #[serde(rename = "os.features", skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,

    #[serde(rename = "variant", skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new<A, O>(architecture: A, os: O) -> Platform
    where
        A: Into<String>,
        O: Into<String>,
    {
        Platform {
            architecture: architecture.into(),
            os: os.into(),
            os_version: None,
            os_features: None,
            variant: None,
        }
    }
}

/// Validate the `type/subtype` syntax of a media type.
pub fn validate_media_type(media_type: &str) -> Result<(), Error> {
    let regex = Regex::new(MEDIA_TYPE_PATTERN).unwrap();
    if !regex.is_match(media_type) {
        return Err(Error::InvalidMediaType(media_type.to_string()));
    }
    Ok(())
}
