use std::convert::TryFrom;
use std::fmt;

use regex::Regex;
use serde::de;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use sha2::{Digest as ShaDigest, Sha256, Sha512};

use crate::errors::Error;

const DIGEST_PATTERN: &str =
    r"^(?P<algorithm>[a-z0-9]+(?:[+._-][a-z0-9]+)*):(?P<encoded>[a-zA-Z0-9=_-]+)$";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Algorithm {
    SHA256,
    SHA512,
}

impl Algorithm {
    pub fn hash(&self, bytes: &[u8]) -> String {
        match self {
            Algorithm::SHA256 => format!("{:x}", Sha256::digest(bytes)),
            Algorithm::SHA512 => format!("{:x}", Sha512::digest(bytes)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Algorithm::SHA256 => write!(f, "sha256"),
            Algorithm::SHA512 => write!(f, "sha512"),
        }
    }
}

/// A content digest in `algorithm:hex` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: Algorithm,
    pub encoded: String,
}

impl Digest {
    /// Digest of the given bytes with the default algorithm.
    pub fn from_bytes(bytes: &[u8]) -> Digest {
        Digest {
            algorithm: Algorithm::SHA256,
            encoded: Algorithm::SHA256.hash(bytes),
        }
    }

    pub fn verify(&self, bytes: &[u8]) -> Result<(), Error> {
        let calculated = self.algorithm.hash(bytes);
        if calculated != self.encoded {
            return Err(Error::MismatchedDigest {
                expected: self.to_string(),
                actual: format!("{}:{}", self.algorithm, calculated),
            });
        }
        Ok(())
    }
}

impl TryFrom<&str> for Digest {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let regex = Regex::new(DIGEST_PATTERN).unwrap();
        let captures = regex
            .captures(value)
            .ok_or_else(|| Error::InvalidDigest(value.to_string()))?;

        let algorithm = match captures.name("algorithm").unwrap().as_str() {
            "sha256" => Algorithm::SHA256,
            "sha512" => Algorithm::SHA512,
            _ => return Err(Error::InvalidDigest(value.to_string())),
        };
        let encoded = captures.name("encoded").unwrap().as_str();

        Ok(Digest {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", &self.algorithm, &self.encoded)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Digest::try_from(string.as_str()).map_err(de::Error::custom)
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let value = format!("{}:{}", &self.algorithm, &self.encoded);
        serializer.serialize_str(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_digest() {
        let digest = Digest::try_from(
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
        )
        .unwrap();
        assert_eq!(digest.algorithm, Algorithm::SHA256);
        assert_eq!(
            digest.encoded,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_parse_rejects_malformed_digests() {
        assert!(Digest::try_from("").is_err());
        assert!(Digest::try_from("sha256").is_err());
        assert!(Digest::try_from("sha256:").is_err());
        assert!(Digest::try_from(":abcdef").is_err());
        assert!(Digest::try_from("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
    }

    #[test]
    fn test_from_bytes_matches_known_value() {
        let digest = Digest::from_bytes(b"{}");
        assert_eq!(
            digest.to_string(),
            "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_verify() {
        let digest = Digest::from_bytes(b"hello");
        assert!(digest.verify(b"hello").is_ok());
        assert!(matches!(
            digest.verify(b"world"),
            Err(Error::MismatchedDigest { .. })
        ));
    }

    #[test]
    fn test_serde_round_trip() {
        let digest = Digest::from_bytes(b"blob");
        let json = serde_json::to_string(&digest).unwrap();
        let parsed: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, parsed);
    }
}
