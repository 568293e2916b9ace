use std::fmt::{Debug, Formatter};

use chainballot_protocol::{CandidateId, Signature};
use serde::{Deserialize, Serialize};

/// A ballot signed by the voter, submitted for casting.
#[derive(Clone, Serialize, Deserialize)]
pub struct BallotSubmission {
    pub election_code: String,
    pub voter_code: String,
    pub candidate_id: CandidateId,
    /// Milliseconds since the Unix epoch, as signed.
    pub timestamp: i64,
    pub signature: Signature,
    /// Hex-encoded eligibility proof, passed through to the ledger untouched.
    #[serde(default)]
    pub proof: Option<String>,
}

impl Debug for BallotSubmission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BallotSubmission")
            .field("election_code", &self.election_code)
            .field("voter_code", &"<redacted>")
            .field("candidate_id", &self.candidate_id)
            .field("timestamp", &self.timestamp)
            .field("signature", &self.signature)
            .field("proof", &self.proof)
            .finish()
    }
}

/// Proof that the ledger accepted a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastReceiptDesc {
    pub tx_hash: String,
    pub voter_id: String,
    pub candidate_id: CandidateId,
    pub timestamp: i64,
    /// Whether the local "has voted" mirror was updated.
    pub reconciled: bool,
}
