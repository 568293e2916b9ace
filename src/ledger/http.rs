use std::time::Duration;

use chainballot_protocol::{CandidateId, ElectionId};
use log::{debug, trace};
use reqwest::{Client as HttpClient, Error as HttpError, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Ledger, LedgerError, LedgerResult, LedgerVote, TxHandle};

/// Client for a JSON gateway in front of the ledger.
///
/// - `POST {base}/elections/{election}/votes` appends a vote.
/// - `GET {base}/elections/{election}/candidates/{candidate}/votes` reads a count.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: HttpClient,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SubmitVoteRequest {
    candidate_id: CandidateId,
    voter_public_key: String,
    signature: String,
    proof: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitVoteResponse {
    tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct VoteCountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    reason: Option<String>,
}

impl HttpLedger {
    /// Create a client for the gateway at `base_url`; every call gives up after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HttpError> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Turn a non-success response into a ledger error.
    async fn rejection(response: Response) -> LedgerError {
        let status = response.status();
        let reason = response
            .json::<RejectionBody>()
            .await
            .ok()
            .and_then(|body| body.reason);
        classify_rejection(status, reason)
    }
}

/// Decide whether a failed gateway response is a revert or a transport problem.
///
/// A response that names a reason is the ledger refusing the call. Without a
/// reason, server-side and rate-limit statuses mean the ledger was never
/// reached.
pub fn classify_rejection(status: StatusCode, reason: Option<String>) -> LedgerError {
    match reason {
        Some(reason) => LedgerError::Revert(reason),
        None if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            LedgerError::Transport(format!("ledger gateway returned {status}"))
        }
        None => LedgerError::Revert(format!("ledger gateway returned {status}")),
    }
}

fn transport(err: HttpError) -> LedgerError {
    LedgerError::Transport(err.to_string())
}

#[rocket::async_trait]
impl Ledger for HttpLedger {
    async fn submit_vote(&self, vote: &LedgerVote) -> LedgerResult<TxHandle> {
        let url = format!("{}/elections/{}/votes", self.base_url, vote.election_id);
        let body = SubmitVoteRequest {
            candidate_id: vote.candidate_id,
            voter_public_key: vote.voter_public_key.to_hex(),
            signature: vote.signature.to_hex(),
            proof: vote.proof.as_ref().map(|p| p.to_hex()),
        };
        debug!("Submitting vote to {url}");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let accepted = response
            .json::<SubmitVoteResponse>()
            .await
            .map_err(transport)?;
        Ok(TxHandle(accepted.tx_hash))
    }

    async fn vote_count(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> LedgerResult<u64> {
        let url = format!(
            "{}/elections/{}/candidates/{}/votes",
            self.base_url, election_id, candidate_id
        );
        trace!("Reading vote count from {url}");
        let response = self.client.get(&url).send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let body = response
            .json::<VoteCountResponse>()
            .await
            .map_err(transport)?;
        Ok(body.count)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::{Arc, Mutex};

    use chainballot_protocol::{generate_keypair, sign_vote};
    use rocket::{
        config::{LogLevel, Shutdown as ShutdownConfig},
        fairing::AdHoc,
        http::Status,
        serde::json::{json, Json, Value},
        tokio::{self, sync::Notify},
        Shutdown, State,
    };

    use super::*;
    use crate::{error::Error, ledger::LedgerSubmitter};

    type Received = Arc<Mutex<Vec<Value>>>;

    /// Election IDs steer how the fake gateway answers.
    const ACCEPTS: ElectionId = 1;
    const REVERTS: ElectionId = 2;
    const UNAVAILABLE: ElectionId = 3;
    const GARBLED: ElectionId = 4;
    const THROTTLED: ElectionId = 5;

    #[post("/elections/<election_id>/votes", data = "<body>")]
    fn fake_submit(
        election_id: ElectionId,
        body: Json<Value>,
        received: &State<Received>,
    ) -> (Status, String) {
        received.lock().unwrap().push(body.into_inner());
        match election_id {
            ACCEPTS => (Status::Ok, json!({ "tx_hash": "0xfeed" }).to_string()),
            REVERTS => (Status::Conflict, json!({ "reason": "Already voted" }).to_string()),
            UNAVAILABLE => (Status::ServiceUnavailable, String::new()),
            GARBLED => (Status::Ok, "<html>not json</html>".to_string()),
            _ => (Status::TooManyRequests, String::new()),
        }
    }

    #[get("/elections/<election_id>/candidates/<candidate_id>/votes")]
    fn fake_count(election_id: ElectionId, candidate_id: CandidateId) -> (Status, String) {
        match election_id {
            ACCEPTS => (
                Status::Ok,
                json!({ "count": 10 * candidate_id }).to_string(),
            ),
            GARBLED => (Status::Ok, json!({ "total": 1 }).to_string()),
            REVERTS => (
                Status::NotFound,
                json!({ "reason": "no such election" }).to_string(),
            ),
            _ => (Status::BadGateway, String::new()),
        }
    }

    /// A gateway on a loopback port, and a client pointed at it.
    struct FakeGateway {
        ledger: HttpLedger,
        received: Received,
        shutdown: Shutdown,
    }

    impl FakeGateway {
        async fn start() -> Self {
            let port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .unwrap()
                .local_addr()
                .unwrap()
                .port();
            let config = rocket::Config {
                address: Ipv4Addr::LOCALHOST.into(),
                port,
                log_level: LogLevel::Off,
                shutdown: ShutdownConfig {
                    ctrlc: false,
                    ..Default::default()
                },
                ..rocket::Config::debug_default()
            };
            let received = Received::default();
            let ready = Arc::new(Notify::new());
            let on_ready = ready.clone();
            let rocket = rocket::custom(config)
                .mount("/", routes![fake_submit, fake_count])
                .manage(received.clone())
                .attach(AdHoc::on_liftoff("Ready", move |_| {
                    let on_ready = on_ready.clone();
                    Box::pin(async move { on_ready.notify_one() })
                }))
                .ignite()
                .await
                .unwrap();
            let shutdown = rocket.shutdown();
            tokio::spawn(rocket.launch());
            tokio::time::timeout(Duration::from_secs(5), ready.notified())
                .await
                .unwrap();

            let url = format!("http://127.0.0.1:{port}/");
            Self {
                ledger: HttpLedger::new(&url, Duration::from_secs(5)).unwrap(),
                received,
                shutdown,
            }
        }

        fn vote(election_id: ElectionId) -> LedgerVote {
            let (private_key, public_key) = generate_keypair().unwrap();
            LedgerVote {
                election_id,
                candidate_id: 2,
                voter_public_key: public_key,
                signature: sign_vote("voter", 2, &private_key, 1).unwrap(),
                proof: None,
            }
        }
    }

    #[backend_test]
    async fn accepted_votes_return_the_tx_hash() {
        let gateway = FakeGateway::start().await;
        let vote = FakeGateway::vote(ACCEPTS);

        let tx = gateway.ledger.submit_vote(&vote).await.unwrap();
        assert_eq!(tx, TxHandle("0xfeed".to_string()));

        let received = gateway.received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["candidate_id"], 2);
        assert_eq!(received[0]["voter_public_key"], vote.voter_public_key.to_hex());
        assert_eq!(received[0]["signature"], vote.signature.to_hex());
        assert_eq!(received[0]["proof"], Value::Null);
        gateway.shutdown.notify();
    }

    #[backend_test]
    async fn already_voted_revert_becomes_duplicate_vote() {
        let gateway = FakeGateway::start().await;
        let vote = FakeGateway::vote(REVERTS);

        assert_eq!(
            gateway.ledger.submit_vote(&vote).await,
            Err(LedgerError::Revert("Already voted".to_string()))
        );

        let submitter = LedgerSubmitter::new(Arc::new(gateway.ledger.clone()));
        let result = submitter
            .submit_vote(
                REVERTS,
                vote.candidate_id,
                &vote.voter_public_key.to_hex(),
                &vote.signature,
                None,
            )
            .await;
        assert!(matches!(result, Err(Error::DuplicateVote)));
        gateway.shutdown.notify();
    }

    #[backend_test]
    async fn unavailable_and_throttled_gateways_are_transport() {
        let gateway = FakeGateway::start().await;

        for election_id in [UNAVAILABLE, THROTTLED] {
            let result = gateway.ledger.submit_vote(&FakeGateway::vote(election_id)).await;
            assert!(matches!(result, Err(LedgerError::Transport(_))), "{result:?}");
        }
        assert!(matches!(
            gateway.ledger.vote_count(THROTTLED, 1).await,
            Err(LedgerError::Transport(_))
        ));
        gateway.shutdown.notify();
    }

    #[backend_test]
    async fn malformed_bodies_are_transport() {
        let gateway = FakeGateway::start().await;

        let result = gateway.ledger.submit_vote(&FakeGateway::vote(GARBLED)).await;
        assert!(matches!(result, Err(LedgerError::Transport(_))));
        assert!(matches!(
            gateway.ledger.vote_count(GARBLED, 1).await,
            Err(LedgerError::Transport(_))
        ));
        gateway.shutdown.notify();
    }

    #[backend_test]
    async fn counts_are_read_per_candidate() {
        let gateway = FakeGateway::start().await;

        assert_eq!(gateway.ledger.vote_count(ACCEPTS, 3).await, Ok(30));
        let counts = gateway.ledger.vote_counts(ACCEPTS, &[1, 2]).await.unwrap();
        assert_eq!(counts.into_iter().collect::<Vec<_>>(), vec![(1, 10), (2, 20)]);
        assert_eq!(
            gateway.ledger.vote_count(REVERTS, 1).await,
            Err(LedgerError::Revert("no such election".to_string()))
        );
        gateway.shutdown.notify();
    }

    #[test]
    fn reasons_are_reverts() {
        let err = classify_rejection(StatusCode::CONFLICT, Some("already voted".to_string()));
        assert_eq!(err, LedgerError::Revert("already voted".to_string()));
        let err = classify_rejection(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("execution reverted".to_string()),
        );
        assert_eq!(err, LedgerError::Revert("execution reverted".to_string()));
    }

    #[test]
    fn unexplained_server_errors_are_transport() {
        assert!(matches!(
            classify_rejection(StatusCode::BAD_GATEWAY, None),
            LedgerError::Transport(_)
        ));
        assert!(matches!(
            classify_rejection(StatusCode::TOO_MANY_REQUESTS, None),
            LedgerError::Transport(_)
        ));
        assert!(matches!(
            classify_rejection(StatusCode::BAD_REQUEST, None),
            LedgerError::Revert(_)
        ));
    }

    #[backend_test]
    async fn unreachable_gateway_is_transport() {
        // Nothing listens on port 9 of the loopback interface.
        let ledger = HttpLedger::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let result = ledger.vote_count(1, 1).await;
        assert!(matches!(result, Err(LedgerError::Transport(_))));
    }
}
