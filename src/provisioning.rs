//! Election setup and one-time credential issuance.

use chainballot_protocol::{generate_code, generate_keypair, hash_access_code, ElectionId};
use log::{info, warn};
use rocket::http::Status;

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        api::{election::ElectionSpec, voter::IssuedCredential},
        db::election::Election,
    },
    store::{DynStore, StoreError},
};

/// Most voters that can be provisioned in one request.
pub const MAX_VOTERS_PER_BATCH: u32 = 10_000;

/// Fresh codes to try before giving up on a collision streak.
const CODE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct Provisioner {
    store: DynStore,
    election_code_length: usize,
    access_code_length: usize,
}

impl Provisioner {
    pub fn new(store: DynStore, election_code_length: usize, access_code_length: usize) -> Self {
        Self {
            store,
            election_code_length,
            access_code_length,
        }
    }

    pub fn from_config(store: DynStore, config: &Config) -> Self {
        Self::new(
            store,
            config.election_code_length(),
            config.access_code_length(),
        )
    }

    /// Create an election under a freshly generated, unique public code.
    pub async fn create_election(&self, spec: ElectionSpec) -> Result<Election> {
        validate_spec(&spec)?;

        for _ in 0..CODE_ATTEMPTS {
            let code = generate_code(self.election_code_length)?;
            match self.store.create_election(spec.clone().into_election(code)).await {
                Ok(election) => {
                    info!("Created election {} ({})", election.id, election.name);
                    return Ok(election);
                }
                Err(StoreError::DuplicateKey) => warn!("Election code collision, retrying"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Status(
            Status::InternalServerError,
            "Could not allocate a unique election code".to_string(),
        ))
    }

    /// Register `count` new voters, returning their credentials.
    ///
    /// This is the only time the access codes and private keys are available;
    /// only the code hashes and public keys are kept.
    pub async fn provision_voters(
        &self,
        election_id: ElectionId,
        count: u32,
    ) -> Result<Vec<IssuedCredential>> {
        if count == 0 || count > MAX_VOTERS_PER_BATCH {
            return Err(Error::Status(
                Status::BadRequest,
                format!("Voter count must be between 1 and {MAX_VOTERS_PER_BATCH}"),
            ));
        }
        match self.store.election(election_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound) => {
                return Err(Error::ElectionNotFound(format!("ID {election_id}")))
            }
            Err(e) => return Err(e.into()),
        }

        let mut issued = Vec::with_capacity(count as usize);
        for _ in 0..count {
            issued.push(self.provision_voter(election_id).await?);
        }
        info!("Provisioned {count} voters for election {election_id}");
        Ok(issued)
    }

    async fn provision_voter(&self, election_id: ElectionId) -> Result<IssuedCredential> {
        for _ in 0..CODE_ATTEMPTS {
            let access_code = generate_code(self.access_code_length)?;
            let (private_key, public_key) = generate_keypair()?;
            let registered = self
                .store
                .register_voter(election_id, hash_access_code(&access_code), public_key)
                .await;
            match registered {
                Ok(voter_id) => {
                    return Ok(IssuedCredential {
                        voter_id: voter_id.to_hex(),
                        access_code,
                        private_key: private_key.to_hex(),
                    })
                }
                Err(StoreError::DuplicateKey) => warn!("Access code collision, retrying"),
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Status(
            Status::InternalServerError,
            "Could not allocate a unique access code".to_string(),
        ))
    }
}

fn validate_spec(spec: &ElectionSpec) -> Result<()> {
    let invalid = |msg: &str| Err(Error::Status(Status::BadRequest, msg.to_string()));
    if spec.name.trim().is_empty() {
        return invalid("Election name must not be empty");
    }
    if spec.candidates.is_empty() {
        return invalid("An election needs at least one candidate");
    }
    if spec.candidates.iter().any(|c| c.name.trim().is_empty()) {
        return invalid("Candidate names must not be empty");
    }
    if spec.end_time <= spec.start_time {
        return invalid("Election must end after it starts");
    }
    Ok(())
}
