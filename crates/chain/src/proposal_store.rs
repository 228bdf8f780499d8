//! In-memory proposal index.

use finalis_messages::ProposalMessage;
use finalis_types::ProposalId;
use std::collections::{BTreeMap, HashMap};

/// Dual-indexed proposal container.
///
/// Unique index by proposal id (O(1) lookup), non-unique ordered index by
/// composite height (range scan for garbage collection).
#[derive(Debug, Default)]
pub struct ProposalStore {
    by_id: HashMap<ProposalId, ProposalMessage>,
    by_height: BTreeMap<u64, Vec<ProposalId>>,
}

impl ProposalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a proposal. Returns `false` when a proposal with the same
    /// id is already stored; the store is unchanged in that case.
    pub fn insert(&mut self, proposal: ProposalMessage) -> bool {
        if self.by_id.contains_key(&proposal.proposal_id) {
            return false;
        }
        self.by_height
            .entry(proposal.get_height())
            .or_default()
            .push(proposal.proposal_id);
        self.by_id.insert(proposal.proposal_id, proposal);
        true
    }

    /// Look up a proposal by id.
    pub fn get(&self, proposal_id: &ProposalId) -> Option<&ProposalMessage> {
        self.by_id.get(proposal_id)
    }

    /// Evict every proposal whose height is strictly below `cutoff`.
    pub fn gc(&mut self, cutoff: u64) {
        let keep = self.by_height.split_off(&cutoff);
        let evicted = std::mem::replace(&mut self.by_height, keep);
        for ids in evicted.values() {
            for id in ids {
                self.by_id.remove(id);
            }
        }
    }

    /// Number of stored proposals.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Smallest stored height, if any.
    pub fn min_height(&self) -> Option<u64> {
        self.by_height.keys().next().copied()
    }

    /// Iterate proposals in height order.
    pub fn iter_by_height(&self) -> impl Iterator<Item = &ProposalMessage> {
        self.by_height
            .values()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finalis_types::{proposal_digest, BlockId, QuorumCertificate};

    fn proposal(block_height: u32, phase: u8) -> ProposalMessage {
        let block_id = BlockId::from_number(block_height, 0x42);
        ProposalMessage {
            proposal_id: proposal_digest(&block_id, phase, &ProposalId::NULL),
            block_id,
            parent_id: ProposalId::NULL,
            final_on_qc: ProposalId::NULL,
            justify: QuorumCertificate::new(0),
            phase_counter: phase,
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut store = ProposalStore::new();
        let p = proposal(1, 0);
        assert!(store.insert(p.clone()));
        assert!(!store.insert(p));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_by_id() {
        let mut store = ProposalStore::new();
        let p = proposal(1, 2);
        store.insert(p.clone());
        assert_eq!(store.get(&p.proposal_id), Some(&p));
        assert!(store.get(&proposal(9, 0).proposal_id).is_none());
    }

    #[test]
    fn test_height_index_is_non_unique() {
        let mut store = ProposalStore::new();
        // Same composite height, different final_on_qc → different ids.
        let block_id = BlockId::from_number(1, 0x42);
        let a = ProposalMessage {
            proposal_id: proposal_digest(&block_id, 0, &ProposalId::NULL),
            block_id,
            parent_id: ProposalId::NULL,
            final_on_qc: ProposalId::NULL,
            justify: QuorumCertificate::new(0),
            phase_counter: 0,
        };
        let other_final = ProposalId::from_bytes([9u8; 32]);
        let b = ProposalMessage {
            proposal_id: proposal_digest(&block_id, 0, &other_final),
            final_on_qc: other_final,
            ..a.clone()
        };
        assert!(store.insert(a.clone()));
        assert!(store.insert(b.clone()));
        assert_eq!(store.len(), 2);
        assert_eq!(a.get_height(), b.get_height());
    }

    #[test]
    fn test_gc_evicts_below_cutoff() {
        let mut store = ProposalStore::new();
        for h in 1..=5u32 {
            for phase in 0..=2u8 {
                store.insert(proposal(h, phase));
            }
        }
        assert_eq!(store.len(), 15);

        store.gc(finalis_types::compute_height(4, 0));
        assert_eq!(store.len(), 6);
        assert_eq!(store.min_height(), Some(finalis_types::compute_height(4, 0)));
        // Entries at and above the cutoff survive.
        assert!(store.get(&proposal(4, 0).proposal_id).is_some());
        assert!(store.get(&proposal(3, 2).proposal_id).is_none());
    }

    #[test]
    fn test_iter_by_height_is_ordered() {
        let mut store = ProposalStore::new();
        store.insert(proposal(3, 0));
        store.insert(proposal(1, 1));
        store.insert(proposal(2, 0));
        let heights: Vec<u64> = store.iter_by_height().map(|p| p.get_height()).collect();
        assert!(heights.windows(2).all(|w| w[0] <= w[1]));
    }
}
