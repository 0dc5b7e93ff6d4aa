//! Content fingerprints for change detection
//!
//! A fingerprint is a lowercase hex digest. Snapshots unloaded from the
//! warehouse carry an MD5 computed in SQL; when a snapshot lacks that column
//! the same kind of value is computed locally from the record's fields.

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;

/// Hash algorithm used for a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl std::fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FingerprintAlgorithm::Md5 => write!(f, "md5"),
            FingerprintAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Comparable digest of one record's content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex digest, normalising case and surrounding whitespace.
    pub fn parse(hex_digest: &str) -> Result<Self> {
        let normalized = hex_digest.trim().to_ascii_lowercase();
        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CommonError::InvalidFingerprint(hex_digest.to_string()));
        }
        Ok(Self(normalized))
    }

    /// MD5 over the record's fields.
    ///
    /// Each field is length-prefixed so that `["a|b"]` and `["a", "b"]`
    /// never share a preimage.
    pub fn of_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut context = md5::Context::new();
        for field in fields {
            let bytes = field.as_ref().as_bytes();
            context.consume((bytes.len() as u64).to_le_bytes());
            context.consume(bytes);
        }
        Self(format!("{:x}", context.compute()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of everything `reader` yields; staged files are checksummed with this
pub fn compute_fingerprint<R: Read>(
    reader: &mut R,
    algorithm: FingerprintAlgorithm,
) -> Result<Fingerprint> {
    let mut buffer = [0u8; 8192];
    match algorithm {
        FingerprintAlgorithm::Md5 => {
            let mut context = md5::Context::new();
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                context.consume(&buffer[..bytes_read]);
            }
            Ok(Fingerprint(format!("{:x}", context.compute())))
        },
        FingerprintAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(Fingerprint(hex::encode(hasher.finalize())))
        },
    }
}
