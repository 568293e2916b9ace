use chrono::{DateTime, Utc};
use chainballot_protocol::{AccessCodeHash, ElectionId, PublicKey};
use log::debug;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    Database,
};
use rocket::futures::TryStreamExt;

use crate::model::{
    db::{
        election::{Election, ElectionCore},
        voter::{NewVoter, Voter},
    },
    mongodb::{u64_bson, u64_id_filter, Coll, Counter, Id, ELECTION_ID_COUNTER_ID},
};

use super::{CredentialStore, StoreError, StoreResult};

/// The production credential store, backed by MongoDB.
///
/// Relies on the unique indexes created by
/// [`ensure_indexes_exist`](crate::model::mongodb::ensure_indexes_exist).
#[derive(Clone)]
pub struct MongoStore {
    elections: Coll<Election>,
    voters: Coll<Voter>,
    new_voters: Coll<NewVoter>,
    counters: Coll<Counter>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            elections: Coll::from_db(db),
            voters: Coll::from_db(db),
            new_voters: Coll::from_db(db),
            counters: Coll::from_db(db),
        }
    }
}

#[rocket::async_trait]
impl CredentialStore for MongoStore {
    async fn create_election(&self, election: ElectionCore) -> StoreResult<Election> {
        let id = Counter::next(&self.counters, ELECTION_ID_COUNTER_ID).await?;
        let election = Election::new(id, election);
        self.elections.insert_one(&election, None).await?;
        debug!("Inserted election {id}");
        Ok(election)
    }

    async fn election(&self, election_id: ElectionId) -> StoreResult<Election> {
        self.elections
            .find_one(u64_id_filter(election_id), None)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn election_by_code(&self, code: &str) -> StoreResult<Election> {
        self.elections
            .find_one(doc! { "code": code }, None)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn open_elections(&self, now: DateTime<Utc>) -> StoreResult<Vec<Election>> {
        let now = BsonDateTime::from_chrono(now);
        let filter = doc! {
            "start_time": { "$lte": now },
            "end_time": { "$gt": now },
        };
        let elections = self.elections.find(filter, None).await?.try_collect().await?;
        Ok(elections)
    }

    async fn upcoming_elections(&self, now: DateTime<Utc>) -> StoreResult<Vec<Election>> {
        let filter = doc! { "start_time": { "$gt": BsonDateTime::from_chrono(now) } };
        let elections = self.elections.find(filter, None).await?.try_collect().await?;
        Ok(elections)
    }

    async fn register_voter(
        &self,
        election_id: ElectionId,
        access_code_hash: AccessCodeHash,
        public_key: PublicKey,
    ) -> StoreResult<Id> {
        let voter = NewVoter::new(election_id, access_code_hash, public_key);
        let id = self
            .new_voters
            .insert_one(&voter, None)
            .await?
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::Inconsistent("voter ID is not an ObjectId".to_string()))?;
        Ok(id.into())
    }

    async fn find_voter_by_hash(
        &self,
        election_id: ElectionId,
        access_code_hash: &AccessCodeHash,
    ) -> StoreResult<Voter> {
        let filter = doc! {
            "election_id": u64_bson(election_id),
            "access_code_hash": access_code_hash.to_string(),
        };
        self.voters
            .find_one(filter, None)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn mark_voted(&self, voter_id: Id) -> StoreResult<()> {
        // Only matches if the flag is still clear, so concurrent callers
        // cannot both succeed.
        let filter = doc! {
            "_id": *voter_id,
            "has_voted": false,
        };
        let update = doc! {
            "$set": { "has_voted": true },
        };
        let updated = self.voters.find_one_and_update(filter, update, None).await?;
        if updated.is_some() {
            return Ok(());
        }
        let exists = self.voters.count_documents(voter_id.as_doc(), None).await? > 0;
        if exists {
            Err(StoreError::AlreadyVoted(voter_id))
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn count_voters(&self, election_id: ElectionId) -> StoreResult<u64> {
        let filter = doc! { "election_id": u64_bson(election_id) };
        Ok(self.voters.count_documents(filter, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use chainballot_protocol::{generate_keypair, hash_access_code};
    use rocket::futures::future::join_all;

    use super::*;

    async fn register(store: &MongoStore, election_id: ElectionId, code: &str) -> Id {
        let (_, public_key) = generate_keypair().unwrap();
        store
            .register_voter(election_id, hash_access_code(code), public_key)
            .await
            .unwrap()
    }

    #[backend_test]
    async fn mongo_elections_by_id_and_code(store: MongoStore) {
        let first = store.create_election(ElectionCore::example()).await.unwrap();
        assert_eq!(first.id, 1);
        assert!(matches!(
            store.create_election(ElectionCore::example()).await,
            Err(StoreError::DuplicateKey)
        ));

        let mut later = ElectionCore::example();
        later.code = "LATER1".to_string();
        later.start_time = later.end_time;
        later.end_time = later.start_time + chrono::Duration::days(1);
        let later = store.create_election(later).await.unwrap();
        assert_eq!(later.id, 3);

        // BSON dates keep milliseconds only, so compare identities.
        let ids = |elections: Vec<Election>| elections.into_iter().map(|e| e.id).collect::<Vec<_>>();
        let found = store.election(first.id).await.unwrap();
        assert_eq!((found.id, found.code.as_str()), (1, "EL3CT1"));
        assert_eq!(found.candidates, first.candidates);
        assert_eq!(store.election_by_code("LATER1").await.unwrap().id, later.id);
        assert!(matches!(store.election(99).await, Err(StoreError::NotFound)));

        let now = Utc::now();
        assert_eq!(ids(store.open_elections(now).await.unwrap()), vec![first.id]);
        assert_eq!(ids(store.upcoming_elections(now).await.unwrap()), vec![later.id]);
    }

    #[backend_test]
    async fn mongo_find_voter(store: MongoStore) {
        let id = register(&store, 1, "XJ3K9P").await;
        register(&store, 2, "XJ3K9P").await;

        let voter = store.find_voter(1, " xj3k9p ").await.unwrap();
        assert_eq!(voter.id, id);
        assert_eq!(voter.election_id, 1);
        assert!(!voter.has_voted);
        assert!(matches!(
            store.find_voter(1, "WRONG1").await,
            Err(StoreError::NotFound)
        ));

        let (_, public_key) = generate_keypair().unwrap();
        assert!(matches!(
            store
                .register_voter(1, hash_access_code("XJ3K9P"), public_key)
                .await,
            Err(StoreError::DuplicateKey)
        ));
        assert_eq!(store.count_voters(1).await.unwrap(), 1);
    }

    #[backend_test]
    async fn mongo_mark_voted_is_check_and_set(store: MongoStore) {
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
    async fn mongo_concurrent_mark_voted_succeeds_once(store: MongoStore) {
        let id = register(&store, 1, "XJ3K9P").await;

        let attempts = (0..16).map(|_| {
            let store = store.clone();
            rocket::tokio::spawn(async move { store.mark_voted(id).await })
        });
        let results = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(StoreError::AlreadyVoted(_)))));
    }
}
