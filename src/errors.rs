use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: `{0}`")]
    NotFound(String),

    #[error("already exists: `{0}`")]
    AlreadyExists(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid media type: `{0}`")]
    InvalidMediaType(String),

    #[error("invalid digest: `{0}`")]
    InvalidDigest(String),

    #[error("invalid reference: `{0}`")]
    InvalidReference(String),

    #[error("invalid date and time format: `{0}`")]
    InvalidDateTimeFormat(String),

    #[error("missing reference")]
    MissingReference,

    #[error("missing artifact type")]
    MissingArtifactType,

    #[error("content size `{size}` exceeds the limit of `{limit}` bytes")]
    SizeExceedsLimit { size: u64, limit: u64 },

    #[error("expected digest `{expected}` is not equal to the calculated digest `{actual}`")]
    MismatchedDigest { expected: String, actual: String },

    #[error("expected size `{expected}` is not equal to the read size `{actual}`")]
    MismatchedSize { expected: u64, actual: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Copy(#[from] Box<CopyError>),
}

/// Which side of a copy operation produced the failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CopyOrigin {
    Source,
    Destination,
    Unknown,
}

impl fmt::Display for CopyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CopyOrigin::Source => write!(f, "source"),
            CopyOrigin::Destination => write!(f, "destination"),
            CopyOrigin::Unknown => write!(f, "unknown"),
        }
    }
}

/// Failure of a single operation against one side of a copy.
#[derive(Debug, Error)]
#[error("failed to perform `{op}` on the {origin}: {source}")]
pub struct CopyError {
    pub op: &'static str,
    pub origin: CopyOrigin,
    #[source]
    pub source: Box<Error>,
}

impl CopyError {
    pub fn new(op: &'static str, origin: CopyOrigin, source: Error) -> CopyError {
        CopyError {
            op,
            origin,
            source: Box::new(source),
        }
    }

    pub(crate) fn on_source(op: &'static str, source: Error) -> Error {
        Error::Copy(Box::new(CopyError::new(op, CopyOrigin::Source, source)))
    }

    pub(crate) fn on_destination(op: &'static str, source: Error) -> Error {
        Error::Copy(Box::new(CopyError::new(op, CopyOrigin::Destination, source)))
    }
}
