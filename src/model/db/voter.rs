use std::ops::{Deref, DerefMut};

use chainballot_protocol::{AccessCodeHash, ElectionId, PublicKey};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core voter data, as stored in the database.
///
/// Neither the plaintext access code nor the private key is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// The election this voter is registered in.
    pub election_id: ElectionId,
    /// One-way hash of the voter's access code.
    pub access_code_hash: AccessCodeHash,
    /// The key that authenticates this voter's ballot.
    pub public_key: PublicKey,
    /// Advisory mirror of the ledger: set once the ledger has accepted a vote.
    pub has_voted: bool,
}

impl VoterCore {
    /// Create a voter who has not yet voted.
    pub fn new(election_id: ElectionId, access_code_hash: AccessCodeHash, public_key: PublicKey) -> Self {
        Self {
            election_id,
            access_code_hash,
            public_key,
            has_voted: false,
        }
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
