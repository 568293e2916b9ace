use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Coll;
use crate::store::{StoreError, StoreResult};

/// ID of the counter handing out election IDs.
pub const ELECTION_ID_COUNTER_ID: &str = "election_id";

/// A counter object used to implement auto-increment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: String,
    pub next: u64,
}

impl Counter {
    /// Atomically retrieve the next value of the counter with the given ID.
    pub async fn next(counters: &Coll<Counter>, id: &str) -> StoreResult<u64> {
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options: FindOneAndUpdateOptions = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::Before)
            .build();
        let counter = counters
            .find_one_and_update(doc! { "_id": id }, update, options)
            .await?
            .ok_or_else(|| StoreError::Inconsistent(format!("Failed to find counter with ID {id}")))?;
        Ok(counter.next)
    }
}

/// Create the election ID counter, starting at 1, unless it already exists.
///
/// This operation is idempotent.
pub async fn ensure_election_id_counter_exists(counters: &Coll<Counter>) -> StoreResult<()> {
    let upsert = UpdateOptions::builder().upsert(true).build();
    counters
        .update_one(
            doc! { "_id": ELECTION_ID_COUNTER_ID },
            doc! { "$setOnInsert": { "next": 1_i64 } },
            upsert,
        )
        .await?;
    Ok(())
}
