use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Both supported algorithms produce 256-bit digests.
const DIGEST_HEX_LEN: usize = 64;

/// Digest algorithm named by a repository index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(SchemaError::Config(format!(
                "unsupported checksum algorithm '{other}'"
            ))),
        }
    }
}

/// Expected digest of an artifact, normalized to lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub value: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: &str) -> Result<Self, SchemaError> {
        let value = value.trim().to_ascii_lowercase();
        if value.len() != DIGEST_HEX_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(SchemaError::Config(format!(
                "malformed {algorithm} checksum '{value}'"
            )));
        }
        Ok(Self { algorithm, value })
    }

    pub fn sha256(value: &str) -> Result<Self, SchemaError> {
        Self::new(ChecksumAlgorithm::Sha256, value)
    }

    pub fn blake3(value: &str) -> Result<Self, SchemaError> {
        Self::new(ChecksumAlgorithm::Blake3, value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}
