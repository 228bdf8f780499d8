//! Identifier newtypes for blocks, proposals and finalizers.

use crate::Hash;
use std::fmt;

/// Pack a block height and a phase counter into a single ordering key.
///
/// The block height occupies the upper 32 bits, the phase counter the
/// lower 32. Proposals across the whole session are totally ordered by
/// this value.
pub const fn compute_height(block_height: u32, phase_counter: u32) -> u64 {
    ((block_height as u64) << 32) | phase_counter as u64
}

/// Identifier of a produced block.
///
/// A 32-byte opaque hash supplied by the block-production layer. Its
/// leading 32 bits (big-endian) encode the block height.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockId(Hash);

impl BlockId {
    /// The null block id (all zero).
    pub const NULL: BlockId = BlockId(Hash::ZERO);

    /// Create a block id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    /// Build a block id for a given height, deriving the remaining bytes
    /// from `seed`. Intended for harnesses that stand in for the block
    /// production layer.
    pub fn from_number(height: u32, seed: u8) -> Self {
        let mut bytes = [seed; 32];
        bytes[..4].copy_from_slice(&height.to_be_bytes());
        Self(Hash::from_bytes(bytes))
    }

    /// The block height encoded in the leading 32 bits.
    pub fn block_height(&self) -> u32 {
        let b = self.0.as_bytes();
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Check whether this is the null block id.
    pub fn is_null(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a proposal.
///
/// The SHA-256 digest over `(block_id, phase_counter, final_on_qc)`;
/// see [`crate::proposal_digest`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProposalId(Hash);

impl ProposalId {
    /// The null proposal id (all zero).
    pub const NULL: ProposalId = ProposalId(Hash::ZERO);

    /// Create a proposal id from a hash.
    pub const fn from_hash(hash: Hash) -> Self {
        Self(hash)
    }

    /// Create a proposal id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Hash::from_bytes(bytes))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Check whether this is the null proposal id.
    pub fn is_null(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a replica / finalizer.
///
/// Finalizer membership is ordered by the policy, not by the name itself;
/// the name is the routing key used by pacemakers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FinalizerName(String);

impl FinalizerName {
    /// Create a finalizer name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FinalizerName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for FinalizerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FinalizerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_height_packs_fields() {
        assert_eq!(compute_height(0, 0), 0);
        assert_eq!(compute_height(0, 3), 3);
        assert_eq!(compute_height(1, 0), 1 << 32);
        assert_eq!(compute_height(2, 1), (2u64 << 32) | 1);
        // Phase rollover never reaches the next block's key range.
        assert!(compute_height(1, u32::MAX) < compute_height(2, 0));
    }

    #[test]
    fn test_block_height_from_leading_bytes() {
        let id = BlockId::from_number(7, 0xaa);
        assert_eq!(id.block_height(), 7);
        assert_eq!(&id.as_bytes()[..4], &7u32.to_be_bytes());
        assert_eq!(id.as_bytes()[4], 0xaa);
    }

    #[test]
    fn test_null_ids() {
        assert!(BlockId::NULL.is_null());
        assert!(ProposalId::NULL.is_null());
        assert_eq!(BlockId::NULL.block_height(), 0);
        assert!(!BlockId::from_number(1, 0).is_null());
    }
}
