//! Test pacemaker: replica host, message queue and network topology.

use finalis_chain::{FinalizerState, HsCommitment, HsMessageWarning, Pacemaker, QcChain};
use finalis_messages::{HsMessage, NewBlockMessage, NewViewMessage, ProposalMessage, VoteMessage};
use finalis_types::{BlockId, FinalizerName, FinalizerPolicy};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// A queued protocol message together with its sender.
pub type QueuedMessage = (FinalizerName, HsMessage);

/// Message class selector for queue controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Leader proposals.
    Proposal,
    /// Finalizer votes.
    Vote,
    /// Leader rotation hand-offs.
    NewView,
    /// Block availability announcements.
    NewBlock,
    /// Every message.
    All,
}

impl MessageClass {
    fn matches(&self, msg: &HsMessage) -> bool {
        matches!(
            (self, msg),
            (MessageClass::All, _)
                | (MessageClass::Proposal, HsMessage::Proposal(_))
                | (MessageClass::Vote, HsMessage::Vote(_))
                | (MessageClass::NewView, HsMessage::NewView(_))
                | (MessageClass::NewBlock, HsMessage::NewBlock(_))
        )
    }
}

/// The pacemaker state shared with hosted replicas.
///
/// Split out from [`TestPacemaker`] so a replica can borrow it mutably
/// while the host still holds the replica map.
struct MessageHub {
    pending_message_queue: VecDeque<QueuedMessage>,
    deactivated: BTreeSet<FinalizerName>,
    // Symmetric topology filter: a key is connected to every node in its
    // mapped set. Messages to self never deliver regardless.
    net: BTreeMap<FinalizerName, BTreeSet<FinalizerName>>,
    proposer: FinalizerName,
    leader: FinalizerName,
    next_leader: FinalizerName,
    finalizer_policy: Arc<FinalizerPolicy>,
    current_block_id: BlockId,
    quorum_threshold_override: Option<u32>,
    warnings: Vec<(FinalizerName, HsMessageWarning)>,
}

impl MessageHub {
    fn new() -> Self {
        Self {
            pending_message_queue: VecDeque::new(),
            deactivated: BTreeSet::new(),
            net: BTreeMap::new(),
            proposer: FinalizerName::default(),
            leader: FinalizerName::default(),
            next_leader: FinalizerName::default(),
            finalizer_policy: Arc::new(FinalizerPolicy::default()),
            current_block_id: BlockId::NULL,
            quorum_threshold_override: None,
            warnings: Vec::new(),
        }
    }

    fn is_connected(&self, a: &FinalizerName, b: &FinalizerName) -> bool {
        self.net.get(a).is_some_and(|peers| peers.contains(b))
    }
}

impl Pacemaker for MessageHub {
    fn get_proposer(&self) -> FinalizerName {
        self.proposer.clone()
    }

    fn get_leader(&self) -> FinalizerName {
        self.leader.clone()
    }

    fn get_next_leader(&self) -> FinalizerName {
        self.next_leader.clone()
    }

    fn get_finalizer_policy(&self) -> Arc<FinalizerPolicy> {
        self.finalizer_policy.clone()
    }

    fn get_current_block_id(&self) -> BlockId {
        self.current_block_id
    }

    fn get_quorum_threshold(&self) -> u32 {
        self.quorum_threshold_override
            .unwrap_or_else(|| self.finalizer_policy.quorum_threshold())
    }

    // Emissions append to the pending queue; nothing is delivered until
    // the test calls dispatch or pipe. The exclude_peer hint is not
    // needed here because recipients filter self-messages anyway.

    fn send_hs_proposal_msg(
        &mut self,
        msg: ProposalMessage,
        sender: &FinalizerName,
        _exclude_peer: Option<&FinalizerName>,
    ) {
        self.pending_message_queue
            .push_back((sender.clone(), HsMessage::Proposal(msg)));
    }

    fn send_hs_vote_msg(
        &mut self,
        msg: VoteMessage,
        sender: &FinalizerName,
        _exclude_peer: Option<&FinalizerName>,
    ) {
        self.pending_message_queue
            .push_back((sender.clone(), HsMessage::Vote(msg)));
    }

    fn send_hs_new_view_msg(
        &mut self,
        msg: NewViewMessage,
        sender: &FinalizerName,
        _exclude_peer: Option<&FinalizerName>,
    ) {
        self.pending_message_queue
            .push_back((sender.clone(), HsMessage::NewView(msg)));
    }

    fn send_hs_new_block_msg(
        &mut self,
        msg: NewBlockMessage,
        sender: &FinalizerName,
        _exclude_peer: Option<&FinalizerName>,
    ) {
        self.pending_message_queue
            .push_back((sender.clone(), HsMessage::NewBlock(msg)));
    }

    fn send_hs_message_warning(&mut self, sender_peer: &FinalizerName, code: HsMessageWarning) {
        trace!(sender = %sender_peer, ?code, "Protocol warning");
        self.warnings.push((sender_peer.clone(), code));
    }
}

/// Deterministic multi-replica host.
///
/// Replicas are keyed by name; `beat` runs them in registration order,
/// deliveries iterate recipients in name order. Deactivated replicas are
/// skipped at delivery time; self-messages are always filtered.
pub struct TestPacemaker {
    hub: MessageHub,
    replicas: BTreeMap<FinalizerName, QcChain>,
    registration_order: Vec<FinalizerName>,
    commitments: BTreeMap<FinalizerName, Vec<HsCommitment>>,
}

impl Default for TestPacemaker {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPacemaker {
    /// Create an empty host.
    pub fn new() -> Self {
        Self {
            hub: MessageHub::new(),
            replicas: BTreeMap::new(),
            registration_order: Vec::new(),
            commitments: BTreeMap::new(),
        }
    }

    // ─── Replica Registry ───

    /// Register a replica. Every chain driven by this host must be
    /// registered before the first beat.
    pub fn register_qc_chain(&mut self, chain: QcChain) {
        let name = chain.get_id().clone();
        self.registration_order.push(name.clone());
        self.replicas.insert(name, chain);
    }

    /// Re-activate a deactivated replica.
    pub fn activate(&mut self, name: &FinalizerName) {
        self.hub.deactivated.remove(name);
    }

    /// Deactivate a replica: it stops receiving beats and in-flight
    /// messages to it are discarded at delivery time.
    pub fn deactivate(&mut self, name: &FinalizerName) {
        self.hub.deactivated.insert(name.clone());
    }

    /// Whether a replica is currently active.
    pub fn is_qc_chain_active(&self, name: &FinalizerName) -> bool {
        !self.hub.deactivated.contains(name)
    }

    /// Snapshot a replica's finalizer state.
    pub fn chain_state(&self, name: &FinalizerName) -> Option<FinalizerState> {
        self.replicas.get(name).map(|c| c.get_state())
    }

    /// Commitments a replica has returned so far, in order.
    pub fn commitments(&self, name: &FinalizerName) -> &[HsCommitment] {
        self.commitments.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All warnings reported through the pacemaker so far.
    pub fn warnings(&self) -> &[(FinalizerName, HsMessageWarning)] {
        &self.hub.warnings
    }

    // ─── Topology ───

    /// Connect every pair among `nodes` (symmetric closure).
    pub fn connect(&mut self, nodes: &[FinalizerName]) {
        for a in nodes {
            for b in nodes {
                if a != b {
                    self.hub.net.entry(a.clone()).or_default().insert(b.clone());
                    self.hub.net.entry(b.clone()).or_default().insert(a.clone());
                }
            }
        }
    }

    /// Disconnect every pair among `nodes` (symmetric).
    pub fn disconnect(&mut self, nodes: &[FinalizerName]) {
        for a in nodes {
            for b in nodes {
                if a != b {
                    if let Some(peers) = self.hub.net.get_mut(a) {
                        peers.remove(b);
                    }
                    if let Some(peers) = self.hub.net.get_mut(b) {
                        peers.remove(a);
                    }
                }
            }
        }
    }

    /// Sever every link between the two groups, both directions.
    pub fn partition(&mut self, group_a: &[FinalizerName], group_b: &[FinalizerName]) {
        for a in group_a {
            for b in group_b {
                if let Some(peers) = self.hub.net.get_mut(a) {
                    peers.remove(b);
                }
                if let Some(peers) = self.hub.net.get_mut(b) {
                    peers.remove(a);
                }
            }
        }
    }

    /// Whether two nodes are connected. Symmetric by construction.
    pub fn is_connected(&self, a: &FinalizerName, b: &FinalizerName) -> bool {
        self.hub.is_connected(a, b)
    }

    // ─── Pacemaker State Setters ───

    /// Set the proposer subsequent queries return.
    pub fn set_proposer(&mut self, proposer: FinalizerName) {
        self.hub.proposer = proposer;
    }

    /// Set the leader subsequent queries return.
    pub fn set_leader(&mut self, leader: FinalizerName) {
        self.hub.leader = leader;
    }

    /// Set the next leader subsequent queries return.
    pub fn set_next_leader(&mut self, next_leader: FinalizerName) {
        self.hub.next_leader = next_leader;
    }

    /// Replace the finalizer policy snapshot.
    pub fn set_finalizer_policy(&mut self, policy: FinalizerPolicy) {
        self.hub.finalizer_policy = Arc::new(policy);
    }

    /// Set the block id the proposer wraps on the next beat.
    pub fn set_current_block_id(&mut self, block_id: BlockId) {
        self.hub.current_block_id = block_id;
    }

    /// Override the quorum threshold. Without an override the threshold
    /// is computed from the policy size.
    pub fn set_quorum_threshold(&mut self, threshold: u32) {
        self.hub.quorum_threshold_override = Some(threshold);
    }

    // ─── Driving ───

    /// Invoke every active replica's `on_beat`, in registration order.
    pub fn beat(&mut self) {
        let order = self.registration_order.clone();
        for name in order {
            if self.hub.deactivated.contains(&name) {
                continue;
            }
            if let Some(chain) = self.replicas.get_mut(&name) {
                chain.on_beat(&mut self.hub);
            }
        }
    }

    /// Append a message to the pending queue. No immediate delivery.
    pub fn add_message_to_queue(&mut self, msg: QueuedMessage) {
        self.hub.pending_message_queue.push_back(msg);
    }

    /// Deliver exactly `messages`, bypassing the pending queue.
    /// Equivalent to enqueueing then dispatching precisely those.
    pub fn pipe(&mut self, messages: Vec<QueuedMessage>) {
        for (sender, msg) in messages {
            self.deliver(&sender, &msg);
        }
    }

    /// Duplicate every queued message of the given class, in place.
    /// Exercises receiver idempotence.
    pub fn duplicate(&mut self, msg_type: MessageClass) {
        let mut queue = VecDeque::with_capacity(self.hub.pending_message_queue.len() * 2);
        for queued in self.hub.pending_message_queue.drain(..) {
            if msg_type.matches(&queued.1) {
                queue.push_back(queued.clone());
            }
            queue.push_back(queued);
        }
        self.hub.pending_message_queue = queue;
    }

    /// Drain and deliver every queued message of `msg_type`, returning
    /// the drained messages for inspection. Messages emitted during
    /// delivery stay queued for the next dispatch.
    pub fn dispatch(&mut self, memo: &str, msg_type: MessageClass) -> Vec<QueuedMessage> {
        self.dispatch_inner(memo, usize::MAX, msg_type)
    }

    /// Drain and deliver up to `count` queued messages of `msg_type`.
    pub fn dispatch_count(&mut self, memo: &str, count: usize, msg_type: MessageClass) {
        self.dispatch_inner(memo, count, msg_type);
    }

    /// Number of messages waiting in the pending queue.
    pub fn pending_message_count(&self) -> usize {
        self.hub.pending_message_queue.len()
    }

    fn dispatch_inner(
        &mut self,
        memo: &str,
        mut budget: usize,
        msg_type: MessageClass,
    ) -> Vec<QueuedMessage> {
        let snapshot = std::mem::take(&mut self.hub.pending_message_queue);
        let mut retained: Vec<QueuedMessage> = Vec::new();
        let mut delivered: Vec<QueuedMessage> = Vec::new();

        for (sender, msg) in snapshot {
            if budget > 0 && msg_type.matches(&msg) {
                self.deliver(&sender, &msg);
                delivered.push((sender, msg));
                budget -= 1;
            } else {
                retained.push((sender, msg));
            }
        }

        // Unselected messages keep their place ahead of anything emitted
        // during this dispatch.
        let emitted = std::mem::take(&mut self.hub.pending_message_queue);
        self.hub.pending_message_queue = retained.into_iter().chain(emitted).collect();

        debug!(
            memo,
            delivered = delivered.len(),
            queued = self.hub.pending_message_queue.len(),
            "Dispatch"
        );
        delivered
    }

    /// Deliver one message to all active, connected recipients in name
    /// order. The sender never receives its own message.
    fn deliver(&mut self, sender: &FinalizerName, msg: &HsMessage) {
        let recipients: Vec<FinalizerName> = self.replicas.keys().cloned().collect();
        for name in recipients {
            if name == *sender {
                continue;
            }
            if self.hub.deactivated.contains(&name) {
                continue;
            }
            if !self.hub.is_connected(sender, &name) {
                continue;
            }
            if let Some(chain) = self.replicas.get_mut(&name) {
                if let Some(commitment) = chain.on_hs_msg(&mut self.hub, sender, msg) {
                    self.commitments
                        .entry(name.clone())
                        .or_default()
                        .push(commitment);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finalis_types::{BlsKeyPair, FinalizerAuthority, ProposalId, QuorumCertificate};

    fn name(i: usize) -> FinalizerName {
        FinalizerName::new(format!("r{i}"))
    }

    fn key(i: usize) -> BlsKeyPair {
        let mut seed = [0u8; 32];
        seed[0] = i as u8;
        seed[1] = 0x51;
        BlsKeyPair::from_seed(&seed)
    }

    fn host_with_replicas(n: usize) -> TestPacemaker {
        let mut tp = TestPacemaker::new();
        let authorities = (0..n)
            .map(|i| FinalizerAuthority {
                name: name(i),
                public_key: key(i).public_key().clone(),
            })
            .collect();
        tp.set_finalizer_policy(FinalizerPolicy::new(authorities));
        for i in 0..n {
            let mut keys = BTreeMap::new();
            keys.insert(name(i), key(i));
            tp.register_qc_chain(QcChain::new(name(i), keys));
        }
        tp
    }

    #[test]
    fn test_topology_is_symmetric() {
        let mut tp = host_with_replicas(4);
        let nodes: Vec<FinalizerName> = (0..4).map(name).collect();

        assert!(!tp.is_connected(&name(0), &name(1)));
        tp.connect(&nodes);
        for a in &nodes {
            for b in &nodes {
                if a != b {
                    assert_eq!(tp.is_connected(a, b), tp.is_connected(b, a));
                    assert!(tp.is_connected(a, b));
                }
            }
        }
        // A node is never connected to itself.
        assert!(!tp.is_connected(&name(0), &name(0)));

        tp.disconnect(&[name(0), name(1)]);
        assert!(!tp.is_connected(&name(0), &name(1)));
        assert!(!tp.is_connected(&name(1), &name(0)));
        assert!(tp.is_connected(&name(0), &name(2)));
    }

    #[test]
    fn test_partition_severs_cross_group_links_only() {
        let mut tp = host_with_replicas(4);
        let nodes: Vec<FinalizerName> = (0..4).map(name).collect();
        tp.connect(&nodes);

        tp.partition(&[name(0), name(1)], &[name(2), name(3)]);

        assert!(tp.is_connected(&name(0), &name(1)));
        assert!(tp.is_connected(&name(2), &name(3)));
        assert!(!tp.is_connected(&name(0), &name(2)));
        assert!(!tp.is_connected(&name(1), &name(3)));
        assert!(!tp.is_connected(&name(3), &name(0)));
    }

    #[test]
    fn test_enqueue_does_not_deliver() {
        let mut tp = host_with_replicas(2);
        tp.connect(&[name(0), name(1)]);

        let msg = HsMessage::NewView(NewViewMessage {
            high_qc: QuorumCertificate::new(2),
        });
        tp.add_message_to_queue((name(0), msg));

        assert_eq!(tp.pending_message_count(), 1);
        // Nothing happened to the replicas yet.
        let version = tp.replicas.get(&name(1)).unwrap().get_state_version();
        assert_eq!(tp.pending_message_count(), 1);

        tp.dispatch("deliver", MessageClass::All);
        assert_eq!(tp.pending_message_count(), 0);
        assert!(tp.replicas.get(&name(1)).unwrap().get_state_version() > version);
    }

    #[test]
    fn test_dispatch_filters_by_class() {
        let mut tp = host_with_replicas(2);
        tp.connect(&[name(0), name(1)]);

        tp.add_message_to_queue((
            name(0),
            HsMessage::NewView(NewViewMessage {
                high_qc: QuorumCertificate::new(2),
            }),
        ));
        tp.add_message_to_queue((
            name(0),
            HsMessage::Vote(VoteMessage {
                proposal_id: ProposalId::NULL,
                finalizer: name(0),
                signature: key(0).sign(b"x"),
            }),
        ));

        let drained = tp.dispatch("views only", MessageClass::NewView);
        assert_eq!(drained.len(), 1);
        assert!(matches!(drained[0].1, HsMessage::NewView(_)));
        // The vote is still queued, in place.
        assert_eq!(tp.pending_message_count(), 1);
    }

    #[test]
    fn test_duplicate_copies_only_selected_class() {
        let mut tp = host_with_replicas(2);
        tp.add_message_to_queue((
            name(0),
            HsMessage::Vote(VoteMessage {
                proposal_id: ProposalId::NULL,
                finalizer: name(0),
                signature: key(0).sign(b"x"),
            }),
        ));
        tp.add_message_to_queue((
            name(0),
            HsMessage::NewView(NewViewMessage {
                high_qc: QuorumCertificate::new(2),
            }),
        ));

        tp.duplicate(MessageClass::Vote);
        assert_eq!(tp.pending_message_count(), 3);
    }

    #[test]
    fn test_deactivated_replica_misses_delivery() {
        let mut tp = host_with_replicas(3);
        let nodes: Vec<FinalizerName> = (0..3).map(name).collect();
        tp.connect(&nodes);
        tp.deactivate(&name(1));

        let v1 = tp.replicas.get(&name(1)).unwrap().get_state_version();
        let v2 = tp.replicas.get(&name(2)).unwrap().get_state_version();

        tp.pipe(vec![(
            name(0),
            HsMessage::NewView(NewViewMessage {
                high_qc: QuorumCertificate::new(3),
            }),
        )]);

        // The deactivated replica saw nothing; the active one did.
        assert_eq!(tp.replicas.get(&name(1)).unwrap().get_state_version(), v1);
        assert!(tp.replicas.get(&name(2)).unwrap().get_state_version() > v2);

        tp.activate(&name(1));
        assert!(tp.is_qc_chain_active(&name(1)));
    }

    #[test]
    fn test_quorum_threshold_computed_or_overridden() {
        let mut tp = host_with_replicas(4);
        // Computed from the policy: ⌈2·4/3⌉ + 1.
        assert_eq!(tp.hub.get_quorum_threshold(), 4);
        tp.set_quorum_threshold(2);
        assert_eq!(tp.hub.get_quorum_threshold(), 2);
    }
}
