use std::fmt::{Display, Formatter};

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CandidateId;

/// Version of the canonical encoding below. Any change to the encoding must
/// bump this, since signer and verifier must agree bit-for-bit.
pub const PAYLOAD_VERSION: u32 = 1;

/// Domain separation prefix, followed by the version.
const DOMAIN: &str = "chainballot/vote";

/// The statement a voter signs: "voter `voter_id` chooses `candidate_id` at
/// `timestamp`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotePayload {
    /// The voter's registered identity.
    pub voter_id: String,
    pub candidate_id: CandidateId,
    /// Wall-clock time in milliseconds since the Unix epoch, as chosen by the
    /// caster. Only there to make repeated payloads distinct.
    pub timestamp: i64,
}

impl VotePayload {
    pub fn new(voter_id: impl Into<String>, candidate_id: CandidateId, timestamp: i64) -> Self {
        Self {
            voter_id: voter_id.into(),
            candidate_id,
            timestamp,
        }
    }

    /// Canonical encoding, version 1. UTF-8 text, fields in fixed order,
    /// newline-separated:
    ///
    /// ```text
    /// chainballot/vote/v1
    /// <byte length of voter_id>:<voter_id>
    /// <candidate_id in decimal>
    /// <timestamp in decimal>
    /// ```
    ///
    /// The length prefix keeps the encoding unambiguous whatever characters
    /// the voter ID contains.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "{DOMAIN}/v{PAYLOAD_VERSION}\n{}:{}\n{}\n{}",
            self.voter_id.len(),
            self.voter_id,
            self.candidate_id,
            self.timestamp
        )
        .into_bytes()
    }

    /// SHA-256 of the canonical encoding. This is what gets signed.
    pub fn digest(&self) -> PayloadDigest {
        PayloadDigest(Sha256::digest(self.canonical_bytes()).into())
    }
}

/// A 32-byte payload hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadDigest(pub [u8; 32]);

impl AsRef<[u8]> for PayloadDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for PayloadDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}
