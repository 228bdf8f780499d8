//! Canonical proposal digest.

use crate::{BlockId, Hash, ProposalId};

/// Compute the digest every finalizer signs for a proposal.
///
/// The preimage is exactly `block_id (32 bytes) || phase_counter (1 byte)
/// || final_on_qc (32 bytes)`; the digest doubles as the proposal id.
/// Implementations on the other side of the wire must match this
/// byte-for-byte.
pub fn proposal_digest(
    block_id: &BlockId,
    phase_counter: u8,
    final_on_qc: &ProposalId,
) -> ProposalId {
    let mut preimage = [0u8; 65];
    preimage[..32].copy_from_slice(block_id.as_bytes());
    preimage[32] = phase_counter;
    preimage[33..].copy_from_slice(final_on_qc.as_bytes());
    ProposalId::from_hash(Hash::digest(&preimage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn test_digest_matches_manual_preimage() {
        let block_id = BlockId::from_number(3, 0x11);
        let final_on_qc = ProposalId::from_bytes([0x22; 32]);

        let mut hasher = Sha256::new();
        hasher.update(block_id.as_bytes());
        hasher.update([2u8]);
        hasher.update(final_on_qc.as_bytes());
        let expected: [u8; 32] = hasher.finalize().into();

        let got = proposal_digest(&block_id, 2, &final_on_qc);
        assert_eq!(got.as_bytes(), &expected);
    }

    #[test]
    fn test_digest_distinguishes_every_field() {
        let base = proposal_digest(&BlockId::from_number(1, 0), 0, &ProposalId::NULL);
        assert_ne!(
            base,
            proposal_digest(&BlockId::from_number(2, 0), 0, &ProposalId::NULL)
        );
        assert_ne!(
            base,
            proposal_digest(&BlockId::from_number(1, 0), 1, &ProposalId::NULL)
        );
        assert_ne!(
            base,
            proposal_digest(
                &BlockId::from_number(1, 0),
                0,
                &ProposalId::from_bytes([1u8; 32])
            )
        );
    }
}
