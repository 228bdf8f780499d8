//! HotStuff QC chain: the per-replica decision engine.
//!
//! This crate provides the three-phase HotStuff voting state machine
//! that finalizes a chain of blocks produced by an external block
//! production layer.
//!
//! # Architecture
//!
//! The engine is a synchronous, event-driven state machine with exactly
//! two entry points:
//!
//! - [`QcChain::on_beat`] → pacemaker time tick; the proposer wraps the
//!   current block id into a proposal (or announces it to the leader)
//! - [`QcChain::on_hs_msg`] → protocol message dispatch; may return a
//!   [`HsCommitment`] when a three-chain completes
//!
//! All I/O goes through the [`Pacemaker`] capability: the engine queries
//! it for roles, policy and the current block id, and calls back into it
//! to emit messages. Test and production pacemakers are interchangeable
//! behind this seam.
//!
//! # Concurrency
//!
//! Each `QcChain` is single-threaded and lock-free internally: at most
//! one call to `on_beat` or `on_hs_msg` may be in progress at any time,
//! and any cross-thread coordination is the caller's responsibility. A
//! monotonically increasing state version is published after every
//! mutating call so external observers can detect change without locks.

mod pacemaker;
mod proposal_store;
mod qc_chain;
mod state;

pub use pacemaker::{HsMessageWarning, Pacemaker};
pub use proposal_store::ProposalStore;
pub use qc_chain::{QcChain, GC_HORIZON};
pub use state::{FinalizerState, HsCommitment};
