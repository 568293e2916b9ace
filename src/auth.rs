//! The Voter Authenticator: proves that a presented code maps to a registered,
//! unused voter slot. Ownership of the signing key is proved later, by the
//! signature itself.

use std::fmt::{Debug, Formatter};

use chainballot_protocol::PublicKey;
use log::debug;

use crate::{
    error::{Error, Result},
    model::{db::election::Election, mongodb::Id},
    store::{DynStore, StoreError},
};

/// A voter slot that passed authentication.
///
/// This only means the local store believes the voter has not voted. The
/// ledger alone can confirm it, by accepting the vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedVoter {
    pub election: Election,
    pub voter_id: Id,
    pub public_key: PublicKey,
}

impl AuthenticatedVoter {
    /// The voter identity that appears in signed vote payloads.
    pub fn payload_voter_id(&self) -> String {
        self.voter_id.to_hex()
    }
}

#[derive(Clone)]
pub struct Authenticator {
    store: DynStore,
}

impl Authenticator {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Resolve the election by its public code, then the voter by their hashed
    /// code, then reject the slot if it is already marked as used.
    ///
    /// Never yields a voter whose `has_voted` flag is set.
    pub async fn authenticate(
        &self,
        election_code: &str,
        voter_code: &str,
    ) -> Result<AuthenticatedVoter> {
        let election_code = election_code.trim().to_ascii_uppercase();
        let election = match self.store.election_by_code(&election_code).await {
            Ok(election) => election,
            Err(StoreError::NotFound) => {
                return Err(Error::ElectionNotFound(format!("code {election_code}")))
            }
            Err(e) => return Err(e.into()),
        };

        let voter = match self.store.find_voter(election.id, voter_code).await {
            Ok(voter) => voter,
            Err(StoreError::NotFound) => {
                debug!("Rejected unknown voter code for election {}", election.id);
                return Err(Error::InvalidVoterCode);
            }
            Err(e) => return Err(e.into()),
        };

        if voter.has_voted {
            debug!("Rejected used voter code for election {}", election.id);
            return Err(Error::AlreadyUsed);
        }

        Ok(AuthenticatedVoter {
            voter_id: voter.id,
            public_key: voter.voter.public_key,
            election,
        })
    }
}

/// One voter's progress through authentication.
///
/// `Unauthenticated -> CodeSubmitted -> Verified | Rejected`. A rejected or
/// verified session may submit codes again to start a fresh attempt.
#[derive(Clone, Default)]
pub enum VoterSession {
    #[default]
    Unauthenticated,
    CodeSubmitted {
        election_code: String,
        voter_code: String,
    },
    Verified(AuthenticatedVoter),
    Rejected {
        reason: &'static str,
    },
}

impl VoterSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the presented codes.
    pub fn submit_codes(&mut self, election_code: impl Into<String>, voter_code: impl Into<String>) {
        *self = Self::CodeSubmitted {
            election_code: election_code.into(),
            voter_code: voter_code.into(),
        };
    }

    /// Check the submitted codes, moving to `Verified` or `Rejected`.
    ///
    /// The submitted voter code is dropped either way.
    pub async fn verify(&mut self, authenticator: &Authenticator) -> Result<&AuthenticatedVoter> {
        let (election_code, voter_code) = match std::mem::take(self) {
            Self::CodeSubmitted {
                election_code,
                voter_code,
            } => (election_code, voter_code),
            other => {
                *self = other;
                return Err(Error::Status(
                    rocket::http::Status::BadRequest,
                    "No codes submitted".to_string(),
                ));
            }
        };

        match authenticator.authenticate(&election_code, &voter_code).await {
            Ok(voter) => {
                *self = Self::Verified(voter);
                match self {
                    Self::Verified(voter) => Ok(voter),
                    _ => unreachable!("state was just set"),
                }
            }
            Err(err) => {
                *self = Self::Rejected { reason: err.kind() };
                Err(err)
            }
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

impl Debug for VoterSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("Unauthenticated"),
            Self::CodeSubmitted { election_code, .. } => f
                .debug_struct("CodeSubmitted")
                .field("election_code", election_code)
                .field("voter_code", &"<redacted>")
                .finish(),
            Self::Verified(voter) => f.debug_tuple("Verified").field(voter).finish(),
            Self::Rejected { reason } => f.debug_struct("Rejected").field("reason", reason).finish(),
        }
    }
}
