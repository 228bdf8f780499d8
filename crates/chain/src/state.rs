//! Externally observable replica state.

use finalis_messages::ProposalMessage;
use finalis_types::{BlockId, FinalizerPolicy, ProposalId, QuorumCertificate};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The ordered set of blocks newly finalized by a three-chain.
///
/// Blocks are listed oldest first. At most one commitment is produced
/// per `on_hs_msg` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsCommitment {
    /// Newly finalized block identifiers, oldest first.
    pub blocks: Vec<BlockId>,
}

/// Snapshot of a replica's finalizer state.
///
/// Produced by [`crate::QcChain::get_state`] for collaborators and test
/// harnesses. A non-null `b_finality_violation` means the replica has
/// observed a safety violation; the marker is sticky.
#[derive(Debug, Clone, Default)]
pub struct FinalizerState {
    /// Whether phase pipelining on quorum is disabled.
    pub chained_mode: bool,
    /// Tip of the chain this replica extends when proposing.
    pub b_leaf: ProposalId,
    /// The locked proposal (two-chain rule).
    pub b_lock: ProposalId,
    /// The most recently committed proposal (three-chain rule).
    pub b_exec: ProposalId,
    /// Sticky marker for a detected safety violation.
    pub b_finality_violation: ProposalId,
    /// Block id of the most recently committed proposal.
    pub block_exec: BlockId,
    /// Block parked while a quorum is still forming.
    pub pending_proposal_block: BlockId,
    /// Highest proposal height this replica has voted at.
    pub v_height: u64,
    /// The highest-height QC observed.
    pub high_qc: QuorumCertificate,
    /// The QC currently being assembled by the leader.
    pub current_qc: QuorumCertificate,
    /// The finalizer policy snapshot in effect.
    pub schedule: Arc<FinalizerPolicy>,
    /// All proposals currently stored, keyed by id.
    pub proposals: BTreeMap<ProposalId, ProposalMessage>,
}

impl FinalizerState {
    /// Look up a stored proposal by id.
    pub fn get_proposal(&self, id: &ProposalId) -> Option<&ProposalMessage> {
        self.proposals.get(id)
    }
}
