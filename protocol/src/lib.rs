//! Protocol primitives for chainballot elections.
//!
//! This crate has no I/O. It covers everything a voter's device or the
//! organizer's tooling needs to agree on bit-for-bit:
//!
//! - random human-readable codes and their one-way hashes,
//! - secp256k1 keypairs for BIP-340 Schnorr signatures,
//! - the canonical, versioned vote payload,
//! - signing and verifying that payload.

pub mod code;
pub mod error;
pub mod keys;
pub mod payload;
pub mod signature;

pub use code::{generate_code, hash_access_code, AccessCodeHash};
pub use error::{Error, Result};
pub use keys::{generate_keypair, normalize_public_key_hex, PrivateKey, PublicKey};
pub use payload::{PayloadDigest, VotePayload, PAYLOAD_VERSION};
pub use signature::{sign_payload, sign_vote, verify_payload, Signature};

/// Election IDs are integers, as indexed by the ledger.
pub type ElectionId = u64;
/// Candidate IDs are integers, stable for the lifetime of an election.
pub type CandidateId = u64;
