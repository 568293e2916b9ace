#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{figment::Figment, Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing, LedgerFairing};
use crate::ledger::DynLedger;
use crate::logging::LoggerFairing;
use crate::store::DynStore;
use crate::tally::TallyFairing;

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod provisioning;
pub mod store;
pub mod tally;
pub mod voting;

/// Build the server from `Rocket.toml` and the environment, connecting to
/// MongoDB and the configured ledger during ignition.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LedgerFairing)
        .attach(TallyFairing)
        .attach(LoggerFairing)
}

/// Build the server around an existing store and ledger instead of the ones
/// named in the configuration.
pub fn rocket_with_backends(figment: Figment, store: DynStore, ledger: DynLedger) -> Rocket<Build> {
    rocket::custom(figment)
        .mount("/", api::routes())
        .manage(store)
        .manage(ledger)
        .attach(ConfigFairing)
        .attach(TallyFairing)
        .attach(LoggerFairing)
}

#[cfg(test)]
fn test_figment() -> Figment {
    rocket::Config::figment()
        .merge(("organizer_token", "test-organizer-token"))
        .merge(("tally_poll_interval", 1))
        .merge(("log_level", "off"))
}

/// Connect to the MongoDB server named by `db_uri` and prepare an empty
/// database for one test.
#[cfg(test)]
async fn test_mongo_store(test_name: &str) -> (store::MongoStore, mongodb::Database) {
    use crate::model::mongodb::{ensure_election_id_counter_exists, ensure_indexes_exist, Coll};

    let db_uri = test_figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    let client = mongodb::Client::with_uri_str(&db_uri)
        .await
        .unwrap_or_else(|e| panic!("Could not connect to database with `db_uri` \"{db_uri}\": {e}"));
    // Database names are limited to 64 bytes.
    let mut db_name = format!("chainballot_test_{test_name}");
    db_name.truncate(63);
    let db = client.database(&db_name);

    // Left over from an aborted run.
    db.drop(None).await.unwrap();
    ensure_indexes_exist(&db).await.unwrap();
    ensure_election_id_counter_exists(&Coll::from_db(&db)).await.unwrap();
    (store::MongoStore::new(&db), db)
}
