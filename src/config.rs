use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    ledger::{DynLedger, HttpLedger, MemoryLedger},
    model::mongodb::{ensure_election_id_counter_exists, ensure_indexes_exist, Coll},
    store::{DynStore, MongoStore},
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_access_code_length")]
    access_code_length: usize,
    #[serde(default = "default_election_code_length")]
    election_code_length: usize,
    #[serde(default = "default_tally_poll_interval")]
    tally_poll_interval: u64,
    // secrets
    organizer_token: String,
}

fn default_access_code_length() -> usize {
    8
}

fn default_election_code_length() -> usize {
    6
}

fn default_tally_poll_interval() -> u64 {
    10
}

impl Config {
    /// Length of voter access codes.
    pub fn access_code_length(&self) -> usize {
        self.access_code_length
    }

    /// Length of public election codes.
    pub fn election_code_length(&self) -> usize {
        self.election_code_length
    }

    /// Time between ledger polls of a watched election.
    pub fn tally_poll_interval(&self) -> Duration {
        Duration::from_secs(self.tally_poll_interval.max(1))
    }

    /// Bearer token that organizer requests must present.
    pub fn organizer_token(&self) -> &str {
        &self.organizer_token
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.organizer_token.is_empty() {
            error!("`organizer_token` must not be empty");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // non-secrets
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: String,
}

fn default_db_name() -> String {
    "chainballot".to_string()
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places the credential store into
/// managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&config.db_name);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }

        // Ensure the global election ID counter exists.
        if let Err(e) = ensure_election_id_counter_exists(&Coll::from_db(&db)).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        let store: DynStore = Arc::new(MongoStore::new(&db));
        rocket = rocket.manage(store);
        Ok(rocket)
    }
}

/// Configuration for the ledger gateway.
#[derive(Deserialize)]
struct LedgerConfig {
    #[serde(default)]
    ledger_url: Option<String>,
    #[serde(default = "default_ledger_timeout")]
    ledger_timeout: u64,
}

fn default_ledger_timeout() -> u64 {
    15
}

/// A fairing that loads the ledger config and places a ledger client into
/// managed state. Without a `ledger_url`, an in-process ledger is used.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<LedgerConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load ledger config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Construct the client.
        let ledger: DynLedger = match config.ledger_url {
            Some(url) => {
                let timeout = Duration::from_secs(config.ledger_timeout);
                match HttpLedger::new(&url, timeout) {
                    Ok(ledger) => {
                        info!("Using ledger gateway at {url}");
                        Arc::new(ledger)
                    }
                    Err(e) => {
                        error!("Failed to build ledger client: {e}");
                        return Err(rocket);
                    }
                }
            }
            None => {
                warn!("No `ledger_url` configured; using an in-process ledger (development only)");
                Arc::new(MemoryLedger::new())
            }
        };

        // Manage the state.
        rocket = rocket.manage(ledger);
        Ok(rocket)
    }
}
