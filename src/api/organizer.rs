use chainballot_protocol::ElectionId;
use chrono::Utc;
use log::{info, warn};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    serde::json::Json,
    Request, Route, State,
};
use sha2::{Digest, Sha256};

use crate::{
    config::Config,
    error::{Error, Result},
    model::api::{
        election::{ElectionDescription, ElectionSpec},
        voter::{IssuedCredential, VoterBatchRequest},
    },
    provisioning::Provisioner,
    store::{DynStore, StoreError},
    tally::TallyWatchers,
};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        provision_voters,
        watch_tally,
        unwatch_tally,
        refresh_tally,
    ]
}

/// Request guard for organizer endpoints: the request must carry
/// `Authorization: Bearer <organizer_token>`.
pub struct Organizer;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Organizer {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.guard::<&State<Config>>().await {
            Outcome::Success(config) => config,
            _ => {
                return Outcome::Failure((
                    Status::InternalServerError,
                    Error::Status(Status::InternalServerError, "Config not loaded".to_string()),
                ))
            }
        };

        let presented = req
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) if tokens_match(token, config.organizer_token()) => {
                Outcome::Success(Organizer)
            }
            Some(_) => {
                warn!("Rejected organizer request with a wrong token");
                unauthorized()
            }
            None => unauthorized(),
        }
    }
}

fn unauthorized() -> Outcome<Organizer, Error> {
    Outcome::Failure((
        Status::Unauthorized,
        Error::Status(Status::Unauthorized, "Organizer token required".to_string()),
    ))
}

/// Compare digests rather than the tokens themselves, so timing reveals
/// nothing about the configured token.
fn tokens_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    _organizer: Organizer,
    spec: Json<ElectionSpec>,
    store: &State<DynStore>,
    config: &State<Config>,
    watchers: &State<TallyWatchers>,
) -> Result<Json<ElectionDescription>> {
    let provisioner = Provisioner::from_config(store.inner().clone(), config);
    let election = provisioner.create_election(spec.into_inner()).await?;

    // Observe it from the moment voting opens.
    if election.end_time > Utc::now() {
        watchers.watch_from(&election).await;
    }
    Ok(Json(election.into()))
}

#[post("/elections/<election_id>/voters", data = "<batch>", format = "json")]
async fn provision_voters(
    _organizer: Organizer,
    election_id: ElectionId,
    batch: Json<VoterBatchRequest>,
    store: &State<DynStore>,
    config: &State<Config>,
) -> Result<Json<Vec<IssuedCredential>>> {
    let provisioner = Provisioner::from_config(store.inner().clone(), config);
    let issued = provisioner
        .provision_voters(election_id, batch.count)
        .await?;
    Ok(Json(issued))
}

#[post("/elections/<election_id>/tally/watch")]
async fn watch_tally(
    _organizer: Organizer,
    election_id: ElectionId,
    store: &State<DynStore>,
    watchers: &State<TallyWatchers>,
) -> Result<Status> {
    match store.election(election_id).await {
        Ok(_) => {}
        Err(StoreError::NotFound) => {
            return Err(Error::ElectionNotFound(format!("ID {election_id}")))
        }
        Err(e) => return Err(e.into()),
    }

    if watchers.watch(election_id).await {
        info!("Watching tally of election {election_id}");
        Ok(Status::Created)
    } else {
        Ok(Status::Ok)
    }
}

#[delete("/elections/<election_id>/tally/watch")]
async fn unwatch_tally(
    _organizer: Organizer,
    election_id: ElectionId,
    watchers: &State<TallyWatchers>,
) -> Result<Status> {
    if watchers.unwatch(election_id).await {
        info!("Stopped watching tally of election {election_id}");
        Ok(Status::NoContent)
    } else {
        Err(Error::not_found(format!(
            "Tally watcher for election {election_id}"
        )))
    }
}

/// Poll a watched election now rather than at its next tick.
#[post("/elections/<election_id>/tally/refresh")]
async fn refresh_tally(
    _organizer: Organizer,
    election_id: ElectionId,
    watchers: &State<TallyWatchers>,
) -> Result<Status> {
    if watchers.trigger(election_id).await {
        Ok(Status::Accepted)
    } else {
        Err(Error::not_found(format!(
            "Tally watcher for election {election_id}"
        )))
    }
}
