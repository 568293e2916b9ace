//! The Credential Store: per-voter access code hashes, public keys, and the
//! advisory "has voted" flag, plus the elections they belong to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chainballot_protocol::{hash_access_code, AccessCodeHash, ElectionId, PublicKey};
use mongodb::error::Error as DbError;
use thiserror::Error;

use crate::model::{
    db::{
        election::{Election, ElectionCore},
        voter::Voter,
    },
    mongodb::{is_duplicate_key_error, Id},
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// A shareable handle on whichever store backs the server.
pub type DynStore = Arc<dyn CredentialStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,
    /// `mark_voted` found the flag already set.
    #[error("Voter {0} is already marked as voted")]
    AlreadyVoted(Id),
    /// A unique index rejected the write.
    #[error("Duplicate key")]
    DuplicateKey,
    #[error("Store is inconsistent: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if is_duplicate_key_error(&err) {
            Self::DuplicateKey
        } else {
            Self::Db(err)
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[rocket::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new election under a fresh ID.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if the code is taken.
    async fn create_election(&self, election: ElectionCore) -> StoreResult<Election>;

    async fn election(&self, election_id: ElectionId) -> StoreResult<Election>;

    async fn election_by_code(&self, code: &str) -> StoreResult<Election>;

    /// Elections accepting votes at the given instant.
    async fn open_elections(&self, now: DateTime<Utc>) -> StoreResult<Vec<Election>>;

    /// Elections whose voting window starts after the given instant.
    async fn upcoming_elections(&self, now: DateTime<Utc>) -> StoreResult<Vec<Election>>;

    /// Register a voter who has not yet voted, returning their new ID.
    async fn register_voter(
        &self,
        election_id: ElectionId,
        access_code_hash: AccessCodeHash,
        public_key: PublicKey,
    ) -> StoreResult<Id>;

    async fn find_voter_by_hash(
        &self,
        election_id: ElectionId,
        access_code_hash: &AccessCodeHash,
    ) -> StoreResult<Voter>;

    /// Find a voter by their plaintext access code, which is hashed before lookup.
    async fn find_voter(&self, election_id: ElectionId, access_code: &str) -> StoreResult<Voter> {
        self.find_voter_by_hash(election_id, &hash_access_code(access_code))
            .await
    }

    /// Flip `has_voted` from false to true as a single check-and-set.
    ///
    /// A second call for the same voter fails with [`StoreError::AlreadyVoted`].
    async fn mark_voted(&self, voter_id: Id) -> StoreResult<()>;

    /// Number of voters registered in the given election.
    async fn count_voters(&self, election_id: ElectionId) -> StoreResult<u64>;
}
