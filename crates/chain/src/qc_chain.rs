//! The HotStuff QC chain state machine.
//!
//! # State Machine Flow
//!
//! 1. **Beat** → the proposer wraps the pacemaker's current block id into
//!    a phase-0 proposal (or announces it to the leader as a new-block
//!    message when the roles differ)
//! 2. **Proposal received** → verify the justify QC, store, evaluate the
//!    safe-node rule, vote when a finalizer
//! 3. **Vote received** → the leader aggregates signatures; on quorum it
//!    pipelines the next phase (or hands off to the next leader with a
//!    new-view message)
//! 4. **Three chained QCs** → commit: the newly final block ids are
//!    returned to the caller

use crate::pacemaker::{HsMessageWarning, Pacemaker};
use crate::proposal_store::ProposalStore;
use crate::state::{FinalizerState, HsCommitment};
use finalis_messages::{
    HsMessage, NewBlockMessage, NewViewMessage, ProposalMessage, VoteMessage,
};
use finalis_types::{
    proposal_digest, BlockId, BlsKeyPair, BlsPublicKey, FinalizerName, FinalizerPolicy,
    ProposalId, QuorumCertificate,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Commit-horizon for proposal garbage collection, in composite height
/// units. Must stay above the three-chain depth; no live marker may point
/// into evicted territory.
pub const GC_HORIZON: u64 = 64;

/// Highest phase counter within a block; the phase after it starts the
/// next block.
const MAX_PHASE: u8 = 3;

/// Per-replica HotStuff decision engine.
///
/// Single-threaded and lock-free; all thread synchronization, if any, is
/// external. See the crate docs for the entry-point contract.
pub struct QcChain {
    // ═══════════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════════
    /// This replica's name.
    id: FinalizerName,

    /// Signing keys for the finalizers this replica operates, from the
    /// host's key store.
    my_finalizer_keys: BTreeMap<FinalizerName, BlsKeyPair>,

    // ═══════════════════════════════════════════════════════════════════════════
    // Chain State
    // ═══════════════════════════════════════════════════════════════════════════
    /// Disables phase pipelining on quorum when set.
    chained_mode: bool,

    /// Block id of the most recently committed proposal.
    block_exec: BlockId,

    /// Block parked while the previous proposal is still gathering votes.
    pending_proposal_block: BlockId,

    /// Tip of the chain extended by new proposals.
    b_leaf: ProposalId,

    /// The locked proposal (two-chain rule).
    b_lock: ProposalId,

    /// The most recently committed proposal (three-chain rule).
    b_exec: ProposalId,

    /// Sticky marker set when a committed ancestor conflicts with the
    /// locked chain. Surfaced to collaborators via `get_state`.
    b_finality_violation: ProposalId,

    /// The highest-height QC observed.
    high_qc: QuorumCertificate,

    /// The QC being assembled out of incoming votes (leader role).
    current_qc: QuorumCertificate,

    /// Highest proposal height this replica has voted at. Monotonically
    /// non-decreasing; enforces one vote per height.
    v_height: u64,

    /// Finalizer policy snapshot, refreshed from the pacemaker at each
    /// entry point.
    schedule: Arc<FinalizerPolicy>,

    /// All proposals seen and not yet garbage collected.
    proposal_store: ProposalStore,

    /// Published after every mutating call; lock-free change detection
    /// for external observers.
    state_version: AtomicU64,
}

impl std::fmt::Debug for QcChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QcChain")
            .field("id", &self.id)
            .field("v_height", &self.v_height)
            .field("b_leaf", &self.b_leaf)
            .field("b_lock", &self.b_lock)
            .field("b_exec", &self.b_exec)
            .field("proposals", &self.proposal_store.len())
            .finish()
    }
}

impl QcChain {
    /// Create a replica.
    ///
    /// # Arguments
    ///
    /// * `id` - This replica's name
    /// * `my_finalizer_keys` - BLS keys for the finalizers this replica
    ///   operates, supplied by the host's key store
    pub fn new(id: FinalizerName, my_finalizer_keys: BTreeMap<FinalizerName, BlsKeyPair>) -> Self {
        Self {
            id,
            my_finalizer_keys,
            chained_mode: false,
            block_exec: BlockId::NULL,
            pending_proposal_block: BlockId::NULL,
            b_leaf: ProposalId::NULL,
            b_lock: ProposalId::NULL,
            b_exec: ProposalId::NULL,
            b_finality_violation: ProposalId::NULL,
            high_qc: QuorumCertificate::new(0),
            current_qc: QuorumCertificate::new(0),
            v_height: 0,
            schedule: Arc::new(FinalizerPolicy::default()),
            proposal_store: ProposalStore::new(),
            state_version: AtomicU64::new(1),
        }
    }

    /// This replica's name.
    pub fn get_id(&self) -> &FinalizerName {
        &self.id
    }

    /// Current state version. Reading without external synchronization
    /// is allowed.
    pub fn get_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    /// Toggle chained mode (no phase pipelining on quorum).
    pub fn set_chained_mode(&mut self, chained: bool) {
        self.chained_mode = chained;
    }

    /// Snapshot the externally observable state.
    pub fn get_state(&self) -> FinalizerState {
        FinalizerState {
            chained_mode: self.chained_mode,
            b_leaf: self.b_leaf,
            b_lock: self.b_lock,
            b_exec: self.b_exec,
            b_finality_violation: self.b_finality_violation,
            block_exec: self.block_exec,
            pending_proposal_block: self.pending_proposal_block,
            v_height: self.v_height,
            high_qc: self.high_qc.clone(),
            current_qc: self.current_qc.clone(),
            schedule: self.schedule.clone(),
            proposals: self
                .proposal_store
                .iter_by_height()
                .map(|p| (p.proposal_id, p.clone()))
                .collect(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Entry Points
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pacemaker time tick.
    ///
    /// When this replica is the proposer it wraps the pacemaker's current
    /// block id into a fresh proposal (leader) or announces it to the
    /// leader (non-leader proposer).
    pub fn on_beat(&mut self, pm: &mut dyn Pacemaker) {
        self.schedule = pm.get_finalizer_policy();

        if !self.am_i_proposer(pm) {
            self.bump_state_version();
            return;
        }

        let block_id = pm.get_current_block_id();
        if self.am_i_leader(pm) {
            if !self.current_qc.is_null() && !self.current_qc.is_quorum_met() {
                // The previous proposal is still gathering votes; park
                // the block until that quorum resolves.
                trace!(
                    replica = %self.id,
                    block = ?block_id,
                    "Parking block, previous proposal still collecting votes"
                );
                self.pending_proposal_block = block_id;
            } else {
                self.pending_proposal_block = BlockId::NULL;
                let _ = self.propose(pm, block_id, 0);
            }
        } else {
            debug!(
                replica = %self.id,
                leader = %pm.get_leader(),
                block = ?block_id,
                "Announcing new block to leader"
            );
            let msg = self.new_block_candidate(block_id);
            pm.send_hs_new_block_msg(msg, &self.id, None);
        }

        self.bump_state_version();
    }

    /// Protocol message dispatch.
    ///
    /// Returns a commitment when processing completes a three-chain; at
    /// most one commitment per call.
    pub fn on_hs_msg(
        &mut self,
        pm: &mut dyn Pacemaker,
        sender: &FinalizerName,
        msg: &HsMessage,
    ) -> Option<HsCommitment> {
        self.schedule = pm.get_finalizer_policy();

        let commitment = match msg {
            HsMessage::Proposal(proposal) => self.process_proposal(pm, sender, proposal),
            HsMessage::Vote(vote) => self.process_vote(pm, sender, vote),
            HsMessage::NewView(new_view) => {
                self.process_new_view(pm, sender, new_view);
                None
            }
            HsMessage::NewBlock(new_block) => self.process_new_block(pm, sender, new_block),
        };

        self.bump_state_version();
        commitment
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Role Checks
    // ═══════════════════════════════════════════════════════════════════════════

    fn am_i_proposer(&self, pm: &dyn Pacemaker) -> bool {
        pm.get_proposer() == self.id
    }

    fn am_i_leader(&self, pm: &dyn Pacemaker) -> bool {
        pm.get_leader() == self.id
    }

    fn am_i_finalizer(&self) -> bool {
        self.my_finalizer_keys
            .keys()
            .any(|name| self.schedule.contains(name))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Proposal Processing
    // ═══════════════════════════════════════════════════════════════════════════

    fn process_proposal(
        &mut self,
        pm: &mut dyn Pacemaker,
        sender: &FinalizerName,
        proposal: &ProposalMessage,
    ) -> Option<HsCommitment> {
        trace!(
            replica = %self.id,
            sender = %sender,
            proposal_id = ?proposal.proposal_id,
            height = proposal.get_height(),
            phase = proposal.phase_counter,
            "Received proposal"
        );

        // The justify QC must verify before anything else is trusted.
        if !proposal.justify.is_null() {
            if proposal.justify.active_finalizers().len() != self.schedule.len() {
                warn!(
                    replica = %self.id,
                    sender = %sender,
                    "Justify bitset length does not match finalizer policy"
                );
                pm.send_hs_message_warning(sender, HsMessageWarning::MalformedMessage);
                return None;
            }
            if self.proposal_store.get(proposal.justify.proposal_id()).is_none() {
                // Justified ancestry we no longer (or never) had; the
                // proposal cannot be validated against it.
                debug!(
                    replica = %self.id,
                    sender = %sender,
                    justify = ?proposal.justify.proposal_id(),
                    "Justify target unknown, dropping proposal"
                );
                pm.send_hs_message_warning(sender, HsMessageWarning::StaleProposal);
                return None;
            }
            let threshold = pm.get_quorum_threshold();
            if !self.is_quorum_met(&proposal.justify, threshold) {
                warn!(
                    replica = %self.id,
                    sender = %sender,
                    justify = ?proposal.justify.proposal_id(),
                    "Justify QC failed quorum verification"
                );
                pm.send_hs_message_warning(sender, HsMessageWarning::SignatureVerificationFailed);
                return None;
            }
        }

        // The id must be the canonical digest; it is also what gets signed.
        let expected_id =
            proposal_digest(&proposal.block_id, proposal.phase_counter, &proposal.final_on_qc);
        if proposal.proposal_id != expected_id {
            warn!(
                replica = %self.id,
                sender = %sender,
                claimed = ?proposal.proposal_id,
                "Proposal id does not match canonical digest"
            );
            pm.send_hs_message_warning(sender, HsMessageWarning::MalformedMessage);
            return None;
        }

        if !self.proposal_store.insert(proposal.clone()) {
            // Duplicate; idempotent.
            trace!(replica = %self.id, proposal_id = ?proposal.proposal_id, "Already stored");
            return None;
        }

        let node_safe = self.is_node_safe(proposal);
        if self.am_i_finalizer() {
            if node_safe {
                self.v_height = proposal.get_height();
                self.sign_and_vote(pm, proposal);
            } else if proposal.get_height() > self.v_height {
                // Not merely stale: the proposal conflicts with the lock
                // or carries an inconsistent final_on_qc.
                pm.send_hs_message_warning(sender, HsMessageWarning::SafeNodeViolation);
            }
        }

        self.update(proposal)
    }

    /// Sign the proposal digest with every finalizer key this replica
    /// operates that is in the current policy, and emit the votes.
    fn sign_and_vote(&mut self, pm: &mut dyn Pacemaker, proposal: &ProposalMessage) {
        for (name, key) in &self.my_finalizer_keys {
            if !self.schedule.contains(name) {
                continue;
            }
            let signature = key.sign(proposal.proposal_id.as_bytes());
            debug!(
                replica = %self.id,
                finalizer = %name,
                proposal_id = ?proposal.proposal_id,
                height = proposal.get_height(),
                "Voting"
            );
            pm.send_hs_vote_msg(
                VoteMessage {
                    proposal_id: proposal.proposal_id,
                    finalizer: name.clone(),
                    signature,
                },
                &self.id,
                None,
            );
        }
    }

    /// The safe-node predicate.
    ///
    /// A proposal is safe to sign when its height is fresh, its
    /// `final_on_qc` matches the one derived from its justify chain, and
    /// it either extends the locked proposal (safety) or carries a newer
    /// QC than the lock (liveness).
    fn is_node_safe(&self, proposal: &ProposalMessage) -> bool {
        let monotony = proposal.get_height() > self.v_height;
        if !monotony {
            return false;
        }

        let Some(expected_final) = self.expected_final_on_qc(&proposal.justify) else {
            return false;
        };
        if proposal.final_on_qc != expected_final {
            debug!(
                replica = %self.id,
                proposal_id = ?proposal.proposal_id,
                "final_on_qc check failed"
            );
            return false;
        }

        if self.b_lock.is_null() {
            return true;
        }
        let safety = self.extends(&proposal.proposal_id, &self.b_lock);
        let liveness = !proposal.justify.is_null()
            && match (
                self.height_of(proposal.justify.proposal_id()),
                self.height_of(&self.b_lock),
            ) {
                (Some(justify_height), Some(lock_height)) => justify_height > lock_height,
                (Some(_), None) => true,
                _ => false,
            };
        safety || liveness
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Vote Processing (leader role)
    // ═══════════════════════════════════════════════════════════════════════════

    fn process_vote(
        &mut self,
        pm: &mut dyn Pacemaker,
        sender: &FinalizerName,
        vote: &VoteMessage,
    ) -> Option<HsCommitment> {
        if !self.am_i_leader(pm) {
            return None;
        }
        // Only votes for the proposal currently being certified count;
        // anything else is a late arrival.
        if *self.current_qc.proposal_id() != vote.proposal_id {
            trace!(
                replica = %self.id,
                voter = %vote.finalizer,
                proposal_id = ?vote.proposal_id,
                "Vote does not target the current proposal"
            );
            return None;
        }
        if self.current_qc.is_quorum_met() {
            return None;
        }

        let Some(proposal) = self.proposal_store.get(&vote.proposal_id).cloned() else {
            return None;
        };

        let Some(finalizer_index) = self.schedule.index_of(&vote.finalizer) else {
            warn!(
                replica = %self.id,
                voter = %vote.finalizer,
                "Vote from finalizer not in policy"
            );
            pm.send_hs_message_warning(sender, HsMessageWarning::UnknownFinalizer);
            return None;
        };

        if self.current_qc.has_vote(finalizer_index) {
            pm.send_hs_message_warning(sender, HsMessageWarning::DuplicateVote);
            return None;
        }

        let Some(public_key) = self.schedule.key_at(finalizer_index) else {
            return None;
        };
        if !public_key.verify(vote.proposal_id.as_bytes(), &vote.signature) {
            warn!(
                replica = %self.id,
                voter = %vote.finalizer,
                proposal_id = ?vote.proposal_id,
                "Vote signature failed verification"
            );
            pm.send_hs_message_warning(sender, HsMessageWarning::SignatureVerificationFailed);
            return None;
        }

        self.current_qc.add_vote(finalizer_index, &vote.signature);
        debug!(
            replica = %self.id,
            voter = %vote.finalizer,
            votes = self.current_qc.vote_count(),
            "Vote aggregated"
        );

        let threshold = pm.get_quorum_threshold();
        if !self.evaluate_quorum(&self.current_qc, threshold) {
            return None;
        }

        info!(
            replica = %self.id,
            proposal_id = ?vote.proposal_id,
            votes = self.current_qc.vote_count(),
            "Quorum met"
        );
        self.current_qc.set_quorum_met();
        self.update_high_qc(self.current_qc.clone());

        if self.leader_rotation_check(pm) {
            // The next leader takes over from our high QC.
            return None;
        }

        if !self.pending_proposal_block.is_null() {
            let block_id = std::mem::replace(&mut self.pending_proposal_block, BlockId::NULL);
            self.propose(pm, block_id, 0)
        } else if !self.chained_mode && proposal.phase_counter < MAX_PHASE {
            self.propose(pm, proposal.block_id, proposal.phase_counter + 1)
        } else {
            None
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // New View / New Block
    // ═══════════════════════════════════════════════════════════════════════════

    fn process_new_view(
        &mut self,
        pm: &mut dyn Pacemaker,
        sender: &FinalizerName,
        new_view: &NewViewMessage,
    ) {
        if new_view.high_qc.is_null() {
            return;
        }
        if new_view.high_qc.active_finalizers().len() != self.schedule.len() {
            pm.send_hs_message_warning(sender, HsMessageWarning::MalformedMessage);
            return;
        }
        let threshold = pm.get_quorum_threshold();
        if !self.is_quorum_met(&new_view.high_qc, threshold) {
            warn!(
                replica = %self.id,
                sender = %sender,
                "New-view high QC failed quorum verification"
            );
            pm.send_hs_message_warning(sender, HsMessageWarning::SignatureVerificationFailed);
            return;
        }
        let mut qc = new_view.high_qc.clone();
        qc.set_quorum_met();
        if self.update_high_qc(qc) {
            debug!(replica = %self.id, sender = %sender, "Adopted high QC from new view");
        }
    }

    fn process_new_block(
        &mut self,
        pm: &mut dyn Pacemaker,
        sender: &FinalizerName,
        new_block: &NewBlockMessage,
    ) -> Option<HsCommitment> {
        if !self.am_i_leader(pm) {
            trace!(
                replica = %self.id,
                sender = %sender,
                "Ignoring new block announcement, not the leader"
            );
            return None;
        }

        // The announcement carries the proposer's high QC; adopt it when
        // it verifies and is newer than ours.
        if !new_block.justify.is_null()
            && new_block.justify.active_finalizers().len() == self.schedule.len()
        {
            let threshold = pm.get_quorum_threshold();
            if self.is_quorum_met(&new_block.justify, threshold) {
                let mut qc = new_block.justify.clone();
                qc.set_quorum_met();
                self.update_high_qc(qc);
            }
        }

        if !self.current_qc.is_null() && !self.current_qc.is_quorum_met() {
            self.pending_proposal_block = new_block.block_id;
            None
        } else {
            self.pending_proposal_block = BlockId::NULL;
            self.propose(pm, new_block.block_id, 0)
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Proposal Generation
    // ═══════════════════════════════════════════════════════════════════════════

    /// Emit a proposal for `(block_id, phase)` — or a new-view hand-off
    /// when the pacemaker reports a different next leader — and process
    /// it locally (the pacemaker never reflects our own messages back).
    fn propose(
        &mut self,
        pm: &mut dyn Pacemaker,
        block_id: BlockId,
        phase_counter: u8,
    ) -> Option<HsCommitment> {
        if self.leader_rotation_check(pm) {
            return None;
        }

        let proposal = self.new_proposal_candidate(block_id, phase_counter);
        info!(
            replica = %self.id,
            proposal_id = ?proposal.proposal_id,
            height = proposal.get_height(),
            phase = phase_counter,
            "Proposing"
        );

        self.reset_qc(proposal.proposal_id);
        self.b_leaf = proposal.proposal_id;

        pm.send_hs_proposal_msg(proposal.clone(), &self.id, None);
        let own_id = self.id.clone();
        self.process_proposal(pm, &own_id, &proposal)
    }

    fn new_proposal_candidate(&self, block_id: BlockId, phase_counter: u8) -> ProposalMessage {
        let justify = self.high_qc.to_msg();
        let final_on_qc = self
            .expected_final_on_qc(&justify)
            .unwrap_or(ProposalId::NULL);
        let proposal_id = proposal_digest(&block_id, phase_counter, &final_on_qc);
        ProposalMessage {
            proposal_id,
            block_id,
            parent_id: self.b_leaf,
            final_on_qc,
            justify,
            phase_counter,
        }
    }

    fn new_block_candidate(&self, block_id: BlockId) -> NewBlockMessage {
        NewBlockMessage {
            block_id,
            justify: self.high_qc.to_msg(),
        }
    }

    /// When the pacemaker reports a different upcoming leader, hand the
    /// high QC over with a new-view message instead of proposing.
    fn leader_rotation_check(&mut self, pm: &mut dyn Pacemaker) -> bool {
        let leader = pm.get_leader();
        let next_leader = pm.get_next_leader();
        if leader == self.id && next_leader != self.id {
            info!(
                replica = %self.id,
                next_leader = %next_leader,
                "Leader rotation, sending new view"
            );
            pm.send_hs_new_view_msg(
                NewViewMessage {
                    high_qc: self.high_qc.to_msg(),
                },
                &self.id,
                Some(&next_leader),
            );
            return true;
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Quorum Evaluation
    // ═══════════════════════════════════════════════════════════════════════════

    /// Full quorum evaluation: bitset sized to the policy, popcount at
    /// threshold, and the aggregated signature verifying against the
    /// public keys the bitset selects, over the certified proposal's
    /// digest.
    fn evaluate_quorum(&self, qc: &QuorumCertificate, threshold: u32) -> bool {
        if qc.active_finalizers().len() != self.schedule.len() {
            return false;
        }
        if qc.vote_count() < threshold {
            return false;
        }
        let Some(target) = self.proposal_store.get(qc.proposal_id()) else {
            return false;
        };
        let Some(agg_sig) = qc.active_agg_sig() else {
            return false;
        };
        let keys: Vec<&BlsPublicKey> = qc
            .active_finalizers()
            .ones()
            .filter_map(|index| self.schedule.key_at(index))
            .collect();
        if keys.len() != qc.vote_count() as usize {
            return false;
        }
        let digest = proposal_digest(&target.block_id, target.phase_counter, &target.final_on_qc);
        agg_sig.verify_aggregate(digest.as_bytes(), &keys)
    }

    /// Quorum check with the locally derived flag as a fast path.
    fn is_quorum_met(&self, qc: &QuorumCertificate, threshold: u32) -> bool {
        qc.is_quorum_met() || self.evaluate_quorum(qc, threshold)
    }

    fn reset_qc(&mut self, proposal_id: ProposalId) {
        self.current_qc.reset(proposal_id, self.schedule.len());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Chain Update & Commit
    // ═══════════════════════════════════════════════════════════════════════════

    /// Adopt `high_qc` when it certifies a higher proposal than the one
    /// we hold; the proposal it certifies becomes the new leaf.
    fn update_high_qc(&mut self, high_qc: QuorumCertificate) -> bool {
        if high_qc.is_null() {
            return false;
        }
        let accept = if self.high_qc.is_null() {
            true
        } else {
            match (
                self.height_of(high_qc.proposal_id()),
                self.height_of(self.high_qc.proposal_id()),
            ) {
                (Some(new_height), Some(old_height)) => new_height > old_height,
                (Some(_), None) => true,
                _ => false,
            }
        };
        if accept {
            trace!(
                replica = %self.id,
                proposal_id = ?high_qc.proposal_id(),
                "Updated high QC"
            );
            self.b_leaf = *high_qc.proposal_id();
            self.high_qc = high_qc;
            self.bump_state_version();
        }
        accept
    }

    /// Walk the justify links and apply the chained update rule.
    ///
    /// With `b_2 ← b_1 ← b` the three most recent justify ancestors
    /// (newest first): adopting the proposal's justify advances the high
    /// QC; a two-chain advances the lock to `b_1`; a three-chain with
    /// direct parent links and strictly consecutive heights commits `b`.
    fn update(&mut self, proposal: &ProposalMessage) -> Option<HsCommitment> {
        if proposal.justify.is_null() {
            return None;
        }

        let chain = self.get_qc_chain(proposal.justify.proposal_id());

        // The justify was verified on receipt; keep the derived flag so
        // later checks can use the fast path.
        let mut justify = proposal.justify.clone();
        justify.set_quorum_met();
        self.update_high_qc(justify);

        if chain.len() < 2 {
            return None;
        }
        let b_2 = &chain[0];
        let b_1 = &chain[1];

        let lock_advances = self.b_lock.is_null()
            || self
                .height_of(&self.b_lock)
                .is_none_or(|lock_height| b_1.get_height() > lock_height);
        if lock_advances {
            trace!(replica = %self.id, b_lock = ?b_1.proposal_id, "Lock advanced");
            self.b_lock = b_1.proposal_id;
        }

        if chain.len() < 3 {
            return None;
        }
        let b = &chain[2];

        let direct_parents =
            b_2.parent_id == b_1.proposal_id && b_1.parent_id == b.proposal_id;
        let consecutive = b_2.get_height() == b_1.get_height() + 1
            && b_1.get_height() == b.get_height() + 1;
        if direct_parents && consecutive {
            let b = b.clone();
            let commitment = self.commit(&b);
            if commitment.is_some() {
                self.b_exec = b.proposal_id;
                self.block_exec = b.block_id;
                self.proposal_store
                    .gc(b.get_height().saturating_sub(GC_HORIZON));
            }
            return commitment;
        }
        None
    }

    /// Commit `proposal` and every uncommitted ancestor down to the
    /// committed anchor, collecting the newly finalized block ids oldest
    /// first.
    ///
    /// A proposal that does not descend from the committed chain is a
    /// finality violation: the sticky marker is set and nothing commits.
    fn commit(&mut self, proposal: &ProposalMessage) -> Option<HsCommitment> {
        if let Some(exec_height) = self.height_of(&self.b_exec) {
            if proposal.get_height() <= exec_height {
                return None;
            }
            if !self.extends(&proposal.proposal_id, &self.b_exec) {
                warn!(
                    replica = %self.id,
                    proposal_id = ?proposal.proposal_id,
                    b_exec = ?self.b_exec,
                    "FINALITY VIOLATION: committed chain conflict"
                );
                self.b_finality_violation = proposal.proposal_id;
                return None;
            }
        }

        let committed_block_height = if self.block_exec.is_null() {
            None
        } else {
            Some(self.block_exec.block_height())
        };

        let mut blocks: Vec<BlockId> = Vec::new();
        let mut cursor = proposal.clone();
        loop {
            let newly_final =
                committed_block_height.is_none_or(|h| cursor.block_height() > h);
            if newly_final && blocks.last() != Some(&cursor.block_id) {
                blocks.push(cursor.block_id);
            }
            if cursor.parent_id.is_null() || cursor.parent_id == self.b_exec {
                break;
            }
            match self.proposal_store.get(&cursor.parent_id) {
                Some(parent) => cursor = parent.clone(),
                // Ancestors below the GC horizon are final by definition.
                None => break,
            }
        }

        if blocks.is_empty() {
            return None;
        }
        blocks.reverse();
        info!(
            replica = %self.id,
            count = blocks.len(),
            newest = ?blocks.last(),
            "Committing blocks"
        );
        Some(HsCommitment { blocks })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Chain Walks
    // ═══════════════════════════════════════════════════════════════════════════

    /// The up-to-three-deep justify ancestry starting at `proposal_id`,
    /// newest first.
    fn get_qc_chain(&self, proposal_id: &ProposalId) -> Vec<ProposalMessage> {
        let mut chain = Vec::with_capacity(3);
        let mut next = *proposal_id;
        while chain.len() < 3 && !next.is_null() {
            let Some(proposal) = self.proposal_store.get(&next) else {
                break;
            };
            next = *proposal.justify.proposal_id();
            chain.push(proposal.clone());
        }
        chain
    }

    /// The `final_on_qc` a proposal with this justify must carry: the
    /// two-chain ancestor of the justify target, falling back to the
    /// target's own `final_on_qc` when the chain is shorter.
    ///
    /// Returns `None` when the justify target is unknown.
    fn expected_final_on_qc(&self, justify: &QuorumCertificate) -> Option<ProposalId> {
        if justify.is_null() {
            return Some(ProposalId::NULL);
        }
        let chain = self.get_qc_chain(justify.proposal_id());
        match chain.len() {
            0 => None,
            1 => Some(chain[0].final_on_qc),
            _ => Some(chain[1].proposal_id),
        }
    }

    /// Whether `descendant` is on the parent chain above `ancestor`.
    fn extends(&self, descendant: &ProposalId, ancestor: &ProposalId) -> bool {
        let mut remaining = self.proposal_store.len();
        let mut current = self.proposal_store.get(descendant).map(|p| p.parent_id);
        while let Some(parent_id) = current {
            if parent_id == *ancestor {
                return true;
            }
            if parent_id.is_null() || remaining == 0 {
                return false;
            }
            remaining -= 1;
            current = self.proposal_store.get(&parent_id).map(|p| p.parent_id);
        }
        false
    }

    fn height_of(&self, proposal_id: &ProposalId) -> Option<u64> {
        self.proposal_store
            .get(proposal_id)
            .map(|p| p.get_height())
    }

    fn bump_state_version(&self) {
        self.state_version.fetch_add(1, Ordering::Relaxed);
    }
}
