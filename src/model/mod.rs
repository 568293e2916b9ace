//! Data types, split by where they live:
//!
//! - [`db`]: types as stored in MongoDB (or the in-memory store).
//! - [`api`]: types as sent over HTTP.
//! - [`mongodb`]: database plumbing shared by the store implementation.

pub mod api;
pub mod db;
pub mod mongodb;
