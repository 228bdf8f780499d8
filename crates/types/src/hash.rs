//! 32-byte hash primitive.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors parsing a hash from a hex string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("expected 64 hex characters, got {0}")]
    WrongLength(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

/// A 32-byte hash value.
///
/// Used as the underlying representation for block and proposal
/// identifiers. Constructed either from raw bytes or by hashing
/// arbitrary data with SHA-256.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The all-zero hash.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Create a hash from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the SHA-256 digest of `data`.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for log readability; Display carries the full value.
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

impl FromStr for Hash {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(HexError::WrongLength(s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| HexError::InvalidHex(e.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let a = Hash::digest(b"hello");
        let b = Hash::digest(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, Hash::digest(b"world"));
    }

    #[test]
    fn test_zero_hash() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::digest(b"x").is_zero());
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = Hash::digest(b"roundtrip");
        let parsed: Hash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert_eq!("ab".parse::<Hash>(), Err(HexError::WrongLength(2)));
        assert!(matches!(
            "zz".repeat(32).parse::<Hash>(),
            Err(HexError::InvalidHex(_))
        ));
    }
}
