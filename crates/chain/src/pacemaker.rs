//! The pacemaker capability: the seam between a replica and its host.

use finalis_messages::{NewBlockMessage, NewViewMessage, ProposalMessage, VoteMessage};
use finalis_types::{BlockId, FinalizerName, FinalizerPolicy};
use std::sync::Arc;

/// Non-fatal protocol fault codes reported back to the pacemaker.
///
/// These are telemetry, not errors: the replica has already absorbed the
/// fault locally and continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsMessageWarning {
    /// Structurally invalid message (e.g. bitset length does not match
    /// the finalizer policy, digest mismatch).
    MalformedMessage,
    /// Vote signer is not in the current finalizer policy.
    UnknownFinalizer,
    /// Proposal references ancestry this replica no longer has.
    StaleProposal,
    /// Vote from a finalizer whose bit is already set.
    DuplicateVote,
    /// Individual or aggregated signature failed verification.
    SignatureVerificationFailed,
    /// Proposal failed the safe-node rule.
    SafeNodeViolation,
}

/// Host capabilities a QC chain consumes.
///
/// The engine depends on this operation set, never on a concrete
/// implementation. Queries return the host's view of the current view
/// (roles, policy, block id); emissions hand messages back to the host
/// for routing. `exclude_peer` is a hint for avoiding reflection in
/// flood broadcast; receivers still filter self-messages.
pub trait Pacemaker {
    /// Name of the replica allowed to emit new-block messages this view.
    fn get_proposer(&self) -> FinalizerName;

    /// Name of the replica that collects votes this view.
    fn get_leader(&self) -> FinalizerName;

    /// Name of the replica for the upcoming view.
    fn get_next_leader(&self) -> FinalizerName;

    /// The ordered finalizer set with BLS keys.
    fn get_finalizer_policy(&self) -> Arc<FinalizerPolicy>;

    /// Block identifier the proposer should wrap.
    fn get_current_block_id(&self) -> BlockId;

    /// Vote count required for quorum.
    fn get_quorum_threshold(&self) -> u32;

    /// Emit a proposal.
    fn send_hs_proposal_msg(
        &mut self,
        msg: ProposalMessage,
        sender: &FinalizerName,
        exclude_peer: Option<&FinalizerName>,
    );

    /// Emit a vote.
    fn send_hs_vote_msg(
        &mut self,
        msg: VoteMessage,
        sender: &FinalizerName,
        exclude_peer: Option<&FinalizerName>,
    );

    /// Emit a leader rotation hand-off.
    fn send_hs_new_view_msg(
        &mut self,
        msg: NewViewMessage,
        sender: &FinalizerName,
        exclude_peer: Option<&FinalizerName>,
    );

    /// Emit a block availability announcement.
    fn send_hs_new_block_msg(
        &mut self,
        msg: NewBlockMessage,
        sender: &FinalizerName,
        exclude_peer: Option<&FinalizerName>,
    );

    /// Report a non-fatal protocol fault attributed to `sender_peer`.
    fn send_hs_message_warning(&mut self, sender_peer: &FinalizerName, code: HsMessageWarning);
}
