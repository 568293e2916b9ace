use std::fmt::{Debug, Formatter};

use chainballot_protocol::{ElectionId, PublicKey};
use serde::{Deserialize, Serialize};

/// A request to provision a batch of voters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterBatchRequest {
    pub count: u32,
}

/// Credentials handed out exactly once when a voter is provisioned.
///
/// This is the only moment the access code and private key exist outside the
/// voter's custody; neither is retained afterwards.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub voter_id: String,
    pub access_code: String,
    /// Hex-encoded secp256k1 scalar.
    pub private_key: String,
}

impl Debug for IssuedCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("voter_id", &self.voter_id)
            .field("access_code", &"<redacted>")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A voter presenting their codes.
#[derive(Clone, Serialize, Deserialize)]
pub struct VoterLoginRequest {
    pub election_code: String,
    pub voter_code: String,
}

impl Debug for VoterLoginRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoterLoginRequest")
            .field("election_code", &self.election_code)
            .field("voter_code", &"<redacted>")
            .finish()
    }
}

/// A successfully authenticated voter slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedVoterDesc {
    pub voter_id: String,
    pub election_id: ElectionId,
    pub public_key: PublicKey,
}
