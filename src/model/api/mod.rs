//! Request and response bodies of the HTTP API.

pub mod ballot;
pub mod election;
pub mod tally;
pub mod voter;
