//! Quorum certificate: aggregated finalizer votes over one proposal.

use crate::{BlsSignature, ProposalId, SignerBitset};

/// A quorum certificate under construction or in transit.
///
/// Carries the proposal being certified, the bitset of finalizers whose
/// votes have been folded in, and the aggregated BLS signature. The
/// `quorum_met` flag is derived locally and never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumCertificate {
    proposal_id: ProposalId,
    active_finalizers: SignerBitset,
    active_agg_sig: Option<BlsSignature>,
    quorum_met: bool,
}

impl Default for QuorumCertificate {
    fn default() -> Self {
        Self::new(0)
    }
}

impl QuorumCertificate {
    /// Create an empty certificate sized for `finalizer_count` positions.
    pub fn new(finalizer_count: usize) -> Self {
        Self {
            proposal_id: ProposalId::NULL,
            active_finalizers: SignerBitset::new(finalizer_count),
            active_agg_sig: None,
            quorum_met: false,
        }
    }

    /// Rebuild a certificate from its transmitted parts.
    ///
    /// `quorum_met` starts false: the receiver decides it locally.
    pub fn from_parts(
        proposal_id: ProposalId,
        active_finalizers: SignerBitset,
        active_agg_sig: Option<BlsSignature>,
    ) -> Self {
        Self {
            proposal_id,
            active_finalizers,
            active_agg_sig,
            quorum_met: false,
        }
    }

    /// Reinitialize for a new proposal: empty bitset, no aggregate,
    /// quorum not met.
    pub fn reset(&mut self, proposal_id: ProposalId, finalizer_count: usize) {
        self.proposal_id = proposal_id;
        self.active_finalizers = SignerBitset::new(finalizer_count);
        self.active_agg_sig = None;
        self.quorum_met = false;
    }

    /// Fold one finalizer's vote into the certificate.
    ///
    /// Sets bit `finalizer_index` and aggregates `signature`. Idempotent:
    /// returns `false` and leaves the certificate unchanged when the bit
    /// is already set (or the index is out of range).
    pub fn add_vote(&mut self, finalizer_index: usize, signature: &BlsSignature) -> bool {
        if !self.active_finalizers.set(finalizer_index) {
            return false;
        }
        self.active_agg_sig = match self.active_agg_sig.take() {
            None => Some(signature.clone()),
            Some(agg) => match BlsSignature::aggregate(&[&agg, signature]) {
                Ok(next) => Some(next),
                Err(_) => {
                    // Aggregation over two well-formed points cannot fail;
                    // keep the prior aggregate rather than corrupt it.
                    Some(agg)
                }
            },
        };
        true
    }

    /// Whether `finalizer_index` has already voted.
    pub fn has_vote(&self, finalizer_index: usize) -> bool {
        self.active_finalizers.test(finalizer_index)
    }

    /// The proposal this certificate is over.
    pub fn proposal_id(&self) -> &ProposalId {
        &self.proposal_id
    }

    /// The bitset of contributing finalizers.
    pub fn active_finalizers(&self) -> &SignerBitset {
        &self.active_finalizers
    }

    /// The aggregated signature, absent until the first vote.
    pub fn active_agg_sig(&self) -> Option<&BlsSignature> {
        self.active_agg_sig.as_ref()
    }

    /// Whether quorum has been established locally.
    pub fn is_quorum_met(&self) -> bool {
        self.quorum_met
    }

    /// Mark quorum as established. Set only after the aggregate verified.
    pub fn set_quorum_met(&mut self) {
        self.quorum_met = true;
    }

    /// Copy for embedding into an outgoing message: identical except the
    /// local `quorum_met` flag is cleared. Receivers re-derive quorum.
    pub fn to_msg(&self) -> Self {
        Self {
            proposal_id: self.proposal_id,
            active_finalizers: self.active_finalizers.clone(),
            active_agg_sig: self.active_agg_sig.clone(),
            quorum_met: false,
        }
    }

    /// True when the certificate does not certify any proposal.
    pub fn is_null(&self) -> bool {
        self.proposal_id.is_null()
    }

    /// Number of votes folded in.
    pub fn vote_count(&self) -> u32 {
        self.active_finalizers.count_ones()
    }
}
