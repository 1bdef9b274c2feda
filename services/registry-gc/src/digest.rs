//! Content digests

use std::fmt;
use std::str::FromStr;

use sha2::Digest as _;

/// A digest algorithm supported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    /// SHA-256, the canonical registry algorithm.
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl Algorithm {
    /// The name used in digest strings and storage paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Number of hex characters in an encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(InvalidDigest::new(s, "unsupported algorithm")),
        }
    }
}

/// A string which could not be parsed as a digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest {input:?}: {reason}")]
pub struct InvalidDigest {
    input: String,
    reason: &'static str,
}

impl InvalidDigest {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_owned(),
            reason,
        }
    }

    /// The rejected input.
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// A validated content address, `algorithm:hex`.
///
/// Digests order lexicographically by their canonical string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    value: String,
    algorithm: Algorithm,
}

impl Digest {
    /// Build a digest from the two path components used by the storage layout.
    pub fn from_parts(algorithm: &str, hex: &str) -> Result<Self, InvalidDigest> {
        let input = format!("{algorithm}:{hex}");
        let algorithm: Algorithm = algorithm
            .parse()
            .map_err(|_| InvalidDigest::new(&input, "unsupported algorithm"))?;

        if hex.len() != algorithm.hex_len() {
            return Err(InvalidDigest::new(&input, "wrong length for algorithm"));
        }

        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(InvalidDigest::new(&input, "not lowercase hex"));
        }

        Ok(Self {
            value: input,
            algorithm,
        })
    }

    /// The SHA-256 digest of some content.
    pub fn sha256(content: &[u8]) -> Self {
        Self::compute(Algorithm::Sha256, content)
    }

    /// Hash `content` with `algorithm`.
    pub fn compute(algorithm: Algorithm, content: &[u8]) -> Self {
        let hash = match algorithm {
            Algorithm::Sha256 => hex::encode(sha2::Sha256::digest(content)),
            Algorithm::Sha384 => hex::encode(sha2::Sha384::digest(content)),
            Algorithm::Sha512 => hex::encode(sha2::Sha512::digest(content)),
        };
        Self {
            value: format!("{}:{hash}", algorithm.as_str()),
            algorithm,
        }
    }

    /// Whether `content` hashes to this digest.
    pub fn verifies(&self, content: &[u8]) -> bool {
        Self::compute(self.algorithm, content) == *self
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash.
    pub fn hex(&self) -> &str {
        &self.value[self.algorithm.as_str().len() + 1..]
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| InvalidDigest::new(s, "missing algorithm separator"))?;
        Digest::from_parts(algorithm, hex)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.value
    }
}
