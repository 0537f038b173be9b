// src/hash.rs

//! Checksums for catalog artifacts
//!
//! Simplestreams items declare a `sha256` and, on older catalogs, only an
//! `md5`. Both are supported so the engine can verify whatever the source
//! publishes:
//!
//! | Algorithm | Used for |
//! |-----------|----------|
//! | SHA-256   | Default; cache addressing and verification |
//! | MD5       | Fallback when a catalog item carries no sha256 |

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,

    /// MD5 (128-bit, legacy catalogs only)
    Md5,
}

impl HashAlgorithm {
    /// Length of a hex digest
    const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Md5 => 32,
        }
    }

    /// Attribute name in catalog items, also the prefix of stored checksums
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Malformed checksum declarations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("expected {expected} hex digits, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("not a hex digest: {0}")]
    InvalidHex(String),
}

/// A checksum value with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum {
    /// The algorithm used
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Create a checksum, validating length and hex digits
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        let expected_len = algorithm.hex_len();

        if value.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: value.len(),
            });
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Parse a prefixed checksum string ("sha256:abc..." or "md5:abc...")
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        if let Some((algo, hash)) = s.split_once(':') {
            Self::new(algo.parse()?, hash)
        } else {
            Self::new(HashAlgorithm::Sha256, s)
        }
    }

    /// Format as a prefixed string ("sha256:abc...")
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental hasher for either supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(hasher) => hasher.update(data),
            HasherState::Md5(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        let value = match self.state {
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Md5(hasher) => format!("{:x}", hasher.finalize()),
        };
        Checksum {
            algorithm: self.algorithm,
            value,
        }
    }
}

/// Compute the checksum of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let hash = hash_bytes(HashAlgorithm::Sha256, b"Hello, World!");
        assert_eq!(
            hash.value,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_md5_hash() {
        let hash = hash_bytes(HashAlgorithm::Md5, b"hello world");
        assert_eq!(hash.value, "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(hasher.finalize(), hash_bytes(HashAlgorithm::Sha256, b"Hello, World!"));
    }

    #[test]
    fn test_checksum_validation() {
        assert!(Checksum::new(HashAlgorithm::Md5, "5eb63bbbe01eeed093cb22bb8f5acdc3").is_ok());
        assert_eq!(
            Checksum::new(HashAlgorithm::Md5, "abc"),
            Err(HashError::InvalidLength { expected: 32, got: 3 })
        );
        assert!(matches!(
            Checksum::new(HashAlgorithm::Md5, "zzb63bbbe01eeed093cb22bb8f5acdc3"),
            Err(HashError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_checksum_is_lowercased() {
        let c = Checksum::new(HashAlgorithm::Md5, "5EB63BBBE01EEED093CB22BB8F5ACDC3").unwrap();
        assert_eq!(c.as_str(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    }

    #[test]
    fn test_prefixed() {
        let c = Checksum::parse_prefixed("md5:5eb63bbbe01eeed093cb22bb8f5acdc3").unwrap();
        assert_eq!(c.algorithm, HashAlgorithm::Md5);
        assert_eq!(c.to_prefixed_string(), "md5:5eb63bbbe01eeed093cb22bb8f5acdc3");
    }
}
