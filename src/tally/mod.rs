//! The Tally Engine and the scheduling around it.
//!
//! [`TallyEngine`] reads the ledger, at most once at a time per election, and
//! diffs each read against the last snapshot it holds. [`TallyPoller`] drives it on a fixed
//! interval for one election, and [`TallyWatchers`] keeps one poller per
//! observed election.

mod engine;
mod poller;
mod watchers;

pub use engine::{Participation, TallyEngine, TallyEvent, TallySnapshot, TallyUpdate};
pub use poller::TallyPoller;
pub use watchers::{TallyFairing, TallyWatchers};
