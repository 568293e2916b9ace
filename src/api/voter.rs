use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    auth::{Authenticator, VoterSession},
    error::{Error, Result},
    ledger::{DynLedger, EligibilityProof},
    model::api::{
        ballot::{BallotSubmission, CastReceiptDesc},
        voter::{AuthenticatedVoterDesc, VoterLoginRequest},
    },
    store::DynStore,
    voting::VoteCaster,
};

pub fn routes() -> Vec<Route> {
    routes![authenticate, cast_vote]
}

#[post("/auth/voter", data = "<login>", format = "json")]
async fn authenticate(
    login: Json<VoterLoginRequest>,
    store: &State<DynStore>,
) -> Result<Json<AuthenticatedVoterDesc>> {
    let login = login.into_inner();
    let authenticator = Authenticator::new(store.inner().clone());

    let mut session = VoterSession::new();
    session.submit_codes(login.election_code, login.voter_code);
    let voter = session.verify(&authenticator).await?;

    Ok(Json(AuthenticatedVoterDesc {
        voter_id: voter.payload_voter_id(),
        election_id: voter.election.id,
        public_key: voter.public_key.clone(),
    }))
}

#[post("/vote", data = "<ballot>", format = "json")]
async fn cast_vote(
    ballot: Json<BallotSubmission>,
    store: &State<DynStore>,
    ledger: &State<DynLedger>,
) -> Result<Json<CastReceiptDesc>> {
    let ballot = ballot.into_inner();
    let proof = ballot
        .proof
        .as_deref()
        .map(EligibilityProof::from_hex)
        .transpose()
        .map_err(|e| Error::Status(Status::BadRequest, format!("Malformed proof: {e}")))?;

    let caster = VoteCaster::new(store.inner().clone(), ledger.inner().clone());
    let receipt = caster
        .submit_signed(
            &ballot.election_code,
            &ballot.voter_code,
            ballot.candidate_id,
            ballot.timestamp,
            ballot.signature,
            proof,
        )
        .await?;
    Ok(Json(receipt.into()))
}
