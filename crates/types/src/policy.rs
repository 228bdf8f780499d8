//! Finalizer policy: the ordered validator set with BLS keys.

use crate::{BlsPublicKey, FinalizerName};

/// A single finalizer authority: name plus BLS public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerAuthority {
    /// Finalizer name.
    pub name: FinalizerName,
    /// BLS public key the finalizer signs votes with.
    pub public_key: BlsPublicKey,
}

/// The ordered finalizer set.
///
/// The ordering is canonical and shared by all replicas; bitset positions
/// in a quorum certificate index into it.
#[derive(Debug, Clone, Default)]
pub struct FinalizerPolicy {
    authorities: Vec<FinalizerAuthority>,
}

impl FinalizerPolicy {
    /// Create a policy from an ordered authority list.
    pub fn new(authorities: Vec<FinalizerAuthority>) -> Self {
        Self { authorities }
    }

    /// Number of finalizers.
    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    /// True when the policy has no finalizers.
    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    /// The ordered authorities.
    pub fn authorities(&self) -> &[FinalizerAuthority] {
        &self.authorities
    }

    /// Position of a finalizer in the canonical order.
    pub fn index_of(&self, name: &FinalizerName) -> Option<usize> {
        self.authorities.iter().position(|a| a.name == *name)
    }

    /// The authority at a bitset position.
    pub fn authority_at(&self, index: usize) -> Option<&FinalizerAuthority> {
        self.authorities.get(index)
    }

    /// The public key at a bitset position.
    pub fn key_at(&self, index: usize) -> Option<&BlsPublicKey> {
        self.authorities.get(index).map(|a| &a.public_key)
    }

    /// Check membership by name.
    pub fn contains(&self, name: &FinalizerName) -> bool {
        self.index_of(name).is_some()
    }

    /// Minimum vote count required for quorum: `⌈2N/3⌉ + 1`.
    pub fn quorum_threshold(&self) -> u32 {
        (self.authorities.len() as u32 * 2).div_ceil(3) + 1
    }
}
