//! Protocol message types for the finalis finality engine.
//!
//! The four HotStuff message variants are pure data with a canonical
//! binary encoding (see [`wire`]). They share no behavior, so they are
//! modeled as a tagged union rather than a trait hierarchy.

pub mod wire;

pub use wire::{decode_message, encode_message, WireError};

use finalis_types::{
    compute_height, BlockId, BlsSignature, FinalizerName, ProposalId, QuorumCertificate,
};

/// A proposal emitted by the leader for one phase of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalMessage {
    /// Digest over `(block_id, phase_counter, final_on_qc)`; doubles as
    /// the digest finalizers sign.
    pub proposal_id: ProposalId,
    /// The block this proposal wraps.
    pub block_id: BlockId,
    /// The proposal this one extends.
    pub parent_id: ProposalId,
    /// The proposal that becomes final once this one gathers a quorum.
    pub final_on_qc: ProposalId,
    /// Certificate justifying this proposal.
    pub justify: QuorumCertificate,
    /// Phase within the block.
    pub phase_counter: u8,
}

impl ProposalMessage {
    /// The block height encoded in the block id.
    pub fn block_height(&self) -> u32 {
        self.block_id.block_height()
    }

    /// Composite ordering key: `(block_height << 32) | phase_counter`.
    pub fn get_height(&self) -> u64 {
        compute_height(self.block_height(), self.phase_counter as u32)
    }
}

/// A finalizer's vote on one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteMessage {
    /// The proposal being voted on.
    pub proposal_id: ProposalId,
    /// Who signed.
    pub finalizer: FinalizerName,
    /// BLS signature over the proposal digest.
    pub signature: BlsSignature,
}

/// Leader hand-off carrying the sender's high QC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewViewMessage {
    /// The highest QC the sender has observed.
    pub high_qc: QuorumCertificate,
}

/// Proposer announcement that a block is available to wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlockMessage {
    /// The freshly produced block.
    pub block_id: BlockId,
    /// The announcing replica's high QC.
    pub justify: QuorumCertificate,
}

/// The protocol message union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HsMessage {
    /// Leader proposal for one phase.
    Proposal(ProposalMessage),
    /// Finalizer vote.
    Vote(VoteMessage),
    /// Leader rotation hand-off.
    NewView(NewViewMessage),
    /// Block availability announcement.
    NewBlock(NewBlockMessage),
}

impl HsMessage {
    /// Human-readable name for this message variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            HsMessage::Proposal(_) => "Proposal",
            HsMessage::Vote(_) => "Vote",
            HsMessage::NewView(_) => "NewView",
            HsMessage::NewBlock(_) => "NewBlock",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finalis_types::proposal_digest;

    #[test]
    fn test_proposal_height_composition() {
        let block_id = BlockId::from_number(5, 0xab);
        let p = ProposalMessage {
            proposal_id: proposal_digest(&block_id, 2, &ProposalId::NULL),
            block_id,
            parent_id: ProposalId::NULL,
            final_on_qc: ProposalId::NULL,
            justify: QuorumCertificate::new(4),
            phase_counter: 2,
        };
        assert_eq!(p.block_height(), 5);
        assert_eq!(p.get_height(), (5u64 << 32) | 2);
    }
}
