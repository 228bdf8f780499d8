//! Deterministic in-process test pacemaker.
//!
//! Hosts a set of [`finalis_chain::QcChain`] replicas over a simulated
//! network and drives them with explicit, replayable controls: message
//! emission lands in a pending queue, and delivery happens only under
//! `dispatch`/`pipe`. Given the same control sequence, a run produces
//! identical results every time.

mod test_pacemaker;

pub use test_pacemaker::{MessageClass, QueuedMessage, TestPacemaker};
