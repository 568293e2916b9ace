//! The append-only vote ledger and everything that talks to it.
//!
//! The ledger is the sole authority on whether a voter has voted: it accepts
//! at most one vote per (election, voter public key) and rejects the rest with
//! an "already voted" revert.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chainballot_protocol::{CandidateId, ElectionId, PublicKey, Signature};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;
mod memory;
mod submitter;

pub use http::{classify_rejection, HttpLedger};
pub use memory::{MemoryLedger, VoteRecord};
pub use submitter::LedgerSubmitter;

/// Substring of a revert reason that means the voter's key already has a vote.
pub const ALREADY_VOTED_REASON: &str = "already voted";

/// Does this revert reason mean "this voter has already voted"?
pub fn is_duplicate_vote_reason(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains(ALREADY_VOTED_REASON)
}

/// Raw outcome of a failed ledger call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger could not be reached or did not answer in time.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The ledger executed the call and refused it.
    #[error("reverted: {0}")]
    Revert(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Handle of an accepted ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(pub String);

impl Display for TxHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque eligibility proof carried alongside a vote.
///
/// No proof system is in use yet; the bytes are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EligibilityProof(pub Vec<u8>);

impl EligibilityProof {
    pub fn from_hex(hex: &str) -> Result<Self, data_encoding::DecodeError> {
        let digits = hex.strip_prefix("0x").unwrap_or(hex);
        HEXLOWER_PERMISSIVE.decode(digits.as_bytes()).map(Self)
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl TryFrom<String> for EligibilityProof {
    type Error = data_encoding::DecodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<EligibilityProof> for String {
    fn from(proof: EligibilityProof) -> Self {
        proof.to_hex()
    }
}

/// A vote as written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerVote {
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
    pub voter_public_key: PublicKey,
    pub signature: Signature,
    pub proof: Option<EligibilityProof>,
}

#[rocket::async_trait]
pub trait Ledger: Send + Sync {
    /// Append a vote. Fails with a revert if this voter key already voted.
    async fn submit_vote(&self, vote: &LedgerVote) -> LedgerResult<TxHandle>;

    /// Votes recorded for one candidate.
    async fn vote_count(&self, election_id: ElectionId, candidate_id: CandidateId)
        -> LedgerResult<u64>;

    /// Votes recorded for each of the given candidates.
    ///
    /// Ledgers with a batched read should override this.
    async fn vote_counts(
        &self,
        election_id: ElectionId,
        candidates: &[CandidateId],
    ) -> LedgerResult<BTreeMap<CandidateId, u64>> {
        let mut counts = BTreeMap::new();
        for &candidate_id in candidates {
            let count = self.vote_count(election_id, candidate_id).await?;
            counts.insert(candidate_id, count);
        }
        Ok(counts)
    }
}

/// A shareable handle on whichever ledger backs the server.
pub type DynLedger = Arc<dyn Ledger>;
