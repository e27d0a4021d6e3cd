//! Content digests.
//!
//! A `Digest` is the canonical `sha256:<64 hex>` identity used for layer
//! ids, chain ids, cache keys and image ids. The hex part doubles as the
//! on-disk directory name under the layer root.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{Result, StrataError};

/// Algorithm prefix for every digest produced by strata.
pub const ALGORITHM: &str = "sha256";

const HEX_LEN: usize = 64;

/// A validated `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Digest of raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_hasher(hasher)
    }

    /// Finish a running SHA256 hasher into a digest.
    pub fn from_hasher(hasher: Sha256) -> Self {
        Digest(format!("{}:{}", ALGORITHM, hex::encode(hasher.finalize())))
    }

    /// Parse and validate a `sha256:<hex>` string.
    pub fn parse(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix("sha256:").ok_or_else(|| {
            StrataError::ValidationError(format!("digest '{}' has no sha256: prefix", s))
        })?;
        if hex_part.len() != HEX_LEN
            || !hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(StrataError::ValidationError(format!(
                "digest '{}' is not 64 lowercase hex characters",
                s
            )));
        }
        Ok(Digest(s.to_string()))
    }

    /// Hex-encoded part, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0[ALGORITHM.len() + 1..]
    }

    /// Full `sha256:<hex>` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = StrataError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = StrataError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}
