use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest {0:?} does not use the sha256 algorithm")]
    Algorithm(String),
    #[error("digest {0:?} is not 64 hexadecimal characters")]
    Encoding(String),
}

/// A content digest of the form `sha256:<64 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Digest(String);

impl Digest {
    /// The hex part, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let encoded = value
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| DigestError::Algorithm(value.clone()))?;
        if encoded.len() != SHA256_HEX_LEN || !encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::Encoding(value));
        }
        Ok(Digest(value))
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::try_from(s.to_string())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: Digest,
}

/// Docker distribution manifest, schema version 2.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// The base layer. Later layers are never used.
    pub fn first_layer(&self) -> Option<&Descriptor> {
        self.layers.first()
    }
}
