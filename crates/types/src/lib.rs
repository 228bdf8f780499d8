//! Core types for the finalis finality engine.
//!
//! This crate provides the foundational types used throughout the
//! consensus implementation:
//!
//! - **Primitives**: Hash, BLS keys and signatures
//! - **Identifiers**: BlockId, ProposalId, FinalizerName
//! - **Consensus types**: SignerBitset, FinalizerPolicy, QuorumCertificate
//! - **Signing**: the canonical proposal digest
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not
//! depend on any other workspace crates, making it the foundation layer.

mod crypto;
mod hash;
mod identifiers;
mod policy;
mod quorum_certificate;
mod signer_bitset;
mod signing;

pub use crypto::{BlsKeyPair, BlsPublicKey, BlsSignature, CryptoError};
pub use hash::{Hash, HexError};
pub use identifiers::{compute_height, BlockId, FinalizerName, ProposalId};
pub use policy::{FinalizerAuthority, FinalizerPolicy};
pub use quorum_certificate::QuorumCertificate;
pub use signer_bitset::SignerBitset;
pub use signing::proposal_digest;
