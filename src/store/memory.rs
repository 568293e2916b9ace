use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use chainballot_protocol::{AccessCodeHash, ElectionId, PublicKey};

use crate::model::{
    db::{
        election::{Election, ElectionCore},
        voter::{Voter, VoterCore},
    },
    mongodb::Id,
};

use super::{CredentialStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    next_election_id: ElectionId,
    elections: HashMap<ElectionId, Election>,
    voters: HashMap<Id, Voter>,
}

/// An in-process credential store with the same uniqueness rules as the
/// MongoDB one. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Inconsistent("memory store lock poisoned".to_string()))
    }
}

#[rocket::async_trait]
impl CredentialStore for MemoryStore {
    async fn create_election(&self, election: ElectionCore) -> StoreResult<Election> {
        let mut tables = self.lock()?;
        if tables.elections.values().any(|e| e.code == election.code) {
            return Err(StoreError::DuplicateKey);
        }
        tables.next_election_id += 1;
        let election = Election::new(tables.next_election_id, election);
        tables.elections.insert(election.id, election.clone());
        Ok(election)
    }

    async fn election(&self, election_id: ElectionId) -> StoreResult<Election> {
        self.lock()?
            .elections
            .get(&election_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn election_by_code(&self, code: &str) -> StoreResult<Election> {
        self.lock()?
            .elections
            .values()
            .find(|e| e.code == code)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn open_elections(&self, now: DateTime<Utc>) -> StoreResult<Vec<Election>> {
        let mut open = self
            .lock()?
            .elections
            .values()
            .filter(|e| e.is_open_at(now))
            .cloned()
            .collect::<Vec<_>>();
        open.sort_by_key(|e| e.id);
        Ok(open)
    }

    async fn upcoming_elections(&self, now: DateTime<Utc>) -> StoreResult<Vec<Election>> {
        let mut upcoming = self
            .lock()?
            .elections
            .values()
            .filter(|e| e.start_time > now)
            .cloned()
            .collect::<Vec<_>>();
        upcoming.sort_by_key(|e| e.id);
        Ok(upcoming)
    }

    async fn register_voter(
        &self,
        election_id: ElectionId,
        access_code_hash: AccessCodeHash,
        public_key: PublicKey,
    ) -> StoreResult<Id> {
        let mut tables = self.lock()?;
        let taken = tables
            .voters
            .values()
            .any(|v| v.election_id == election_id && v.access_code_hash == access_code_hash);
        if taken {
            return Err(StoreError::DuplicateKey);
        }
        let id = Id::new();
        let voter = Voter {
            id,
            voter: VoterCore::new(election_id, access_code_hash, public_key),
        };
        tables.voters.insert(id, voter);
        Ok(id)
    }

    async fn find_voter_by_hash(
        &self,
        election_id: ElectionId,
        access_code_hash: &AccessCodeHash,
    ) -> StoreResult<Voter> {
        self.lock()?
            .voters
            .values()
            .find(|v| v.election_id == election_id && v.access_code_hash == *access_code_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn mark_voted(&self, voter_id: Id) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let voter = tables.voters.get_mut(&voter_id).ok_or(StoreError::NotFound)?;
        if voter.has_voted {
            return Err(StoreError::AlreadyVoted(voter_id));
        }
        voter.has_voted = true;
        Ok(())
    }

    async fn count_voters(&self, election_id: ElectionId) -> StoreResult<u64> {
        let count = self
            .lock()?
            .voters
            .values()
            .filter(|v| v.election_id == election_id)
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use chainballot_protocol::{generate_keypair, hash_access_code};
    use rocket::futures::future::join_all;

    use super::*;

    async fn register(store: &MemoryStore, election_id: ElectionId, code: &str) -> Id {
        let (_, public_key) = generate_keypair().unwrap();
        store
            .register_voter(election_id, hash_access_code(code), public_key)
            .await
            .unwrap()
    }

    #[backend_test]
    async fn elections_get_sequential_ids_and_unique_codes(store: MemoryStore) {
        let first = store.create_election(ElectionCore::example()).await.unwrap();
        assert_eq!(first.id, 1);

        // Same code again is rejected.
        let duplicate = store.create_election(ElectionCore::example()).await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey)));

        let mut other = ElectionCore::example();
        other.code = "OTHER1".to_string();
        let second = store.create_election(other).await.unwrap();
        assert_eq!(second.id, 2);

        assert_eq!(store.election(2).await.unwrap(), second);
        assert_eq!(store.election_by_code("EL3CT1").await.unwrap(), first);
        assert!(matches!(store.election(3).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.election_by_code("NOPE00").await,
            Err(StoreError::NotFound)
        ));
    }

    #[backend_test]
    async fn open_elections_respects_schedule(store: MemoryStore) {
        let open = store.create_election(ElectionCore::example()).await.unwrap();
        let mut closed = ElectionCore::example();
        closed.code = "CLOSED".to_string();
        closed.end_time = closed.start_time;
        store.create_election(closed).await.unwrap();

        let mut later = ElectionCore::example();
        later.code = "LATER1".to_string();
        later.start_time = later.end_time;
        let later = store.create_election(later).await.unwrap();

        let found = store.open_elections(Utc::now()).await.unwrap();
        assert_eq!(found, vec![open]);
        assert_eq!(store.upcoming_elections(Utc::now()).await.unwrap(), vec![later]);
    }

    #[backend_test]
    async fn voters_are_found_by_code_within_their_election(store: MemoryStore) {
        let id = register(&store, 1, "XJ3K9P").await;

        let voter = store.find_voter(1, "XJ3K9P").await.unwrap();
        assert_eq!(voter.id, id);
        assert!(!voter.has_voted);
        // Lookup normalizes the presented code the same way issuance does.
        assert_eq!(store.find_voter(1, " xj3k9p ").await.unwrap().id, id);

        assert!(matches!(
            store.find_voter(2, "XJ3K9P").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.find_voter(1, "WRONG1").await,
            Err(StoreError::NotFound)
        ));

        // The same code cannot be issued twice in one election.
        let (_, public_key) = generate_keypair().unwrap();
        assert!(matches!(
            store
                .register_voter(1, hash_access_code("XJ3K9P"), public_key)
                .await,
            Err(StoreError::DuplicateKey)
        ));
    }

    #[backend_test]
    async fn mark_voted_is_check_and_set(store: MemoryStore) {
        let id = register(&store, 1, "XJ3K9P").await;

        store.mark_voted(id).await.unwrap();
        assert!(store.find_voter(1, "XJ3K9P").await.unwrap().has_voted);
        assert!(matches!(
            store.mark_voted(id).await,
            Err(StoreError::AlreadyVoted(voter)) if voter == id
        ));
        assert!(matches!(
            store.mark_voted(Id::new()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[backend_test]
    async fn concurrent_mark_voted_succeeds_once(store: MemoryStore) {
        let id = register(&store, 1, "XJ3K9P").await;

        let attempts = (0..16).map(|_| {
            let store = store.clone();
            rocket::tokio::spawn(async move { store.mark_voted(id).await })
        });
        let results = join_all(attempts).await;
        let successes = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();
        assert_eq!(successes, 1);
    }

    #[backend_test]
    async fn count_voters_per_election(store: MemoryStore) {
        for code in ["AAAA", "BBBB", "CCCC"] {
            register(&store, 1, code).await;
        }
        register(&store, 2, "AAAA").await;

        assert_eq!(store.count_voters(1).await.unwrap(), 3);
        assert_eq!(store.count_voters(2).await.unwrap(), 1);
        assert_eq!(store.count_voters(3).await.unwrap(), 0);
    }
}
