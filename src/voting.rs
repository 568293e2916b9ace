//! Casting votes: authenticate, sign or verify, submit to the ledger, and
//! mirror the outcome into the credential store.

use chainballot_protocol::{
    sign_vote, verify_payload, CandidateId, PrivateKey, Signature, VotePayload,
};
use chrono::Utc;
use log::{debug, info, warn};

use crate::{
    auth::{AuthenticatedVoter, Authenticator},
    error::{Error, Result},
    ledger::{DynLedger, EligibilityProof, LedgerSubmitter, TxHandle},
    model::{api::ballot::CastReceiptDesc, mongodb::Id},
    store::{DynStore, StoreError},
};

/// A vote the ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastReceipt {
    pub tx: TxHandle,
    pub voter_id: String,
    pub candidate_id: CandidateId,
    pub timestamp: i64,
    /// Whether the local "has voted" flag now mirrors the ledger.
    pub reconciled: bool,
}

impl From<CastReceipt> for CastReceiptDesc {
    fn from(receipt: CastReceipt) -> Self {
        Self {
            tx_hash: receipt.tx.0,
            voter_id: receipt.voter_id,
            candidate_id: receipt.candidate_id,
            timestamp: receipt.timestamp,
            reconciled: receipt.reconciled,
        }
    }
}

/// Milliseconds since the Unix epoch, as used in vote payloads.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone)]
pub struct VoteCaster {
    authenticator: Authenticator,
    submitter: LedgerSubmitter,
    store: DynStore,
}

impl VoteCaster {
    pub fn new(store: DynStore, ledger: DynLedger) -> Self {
        Self {
            authenticator: Authenticator::new(store.clone()),
            submitter: LedgerSubmitter::new(ledger),
            store,
        }
    }

    /// Cast a vote holding the private key locally: authenticate, build and
    /// sign the canonical payload, submit it, then update the local flag.
    ///
    /// The key is only borrowed for signing and is never stored or logged.
    pub async fn cast(
        &self,
        election_code: &str,
        voter_code: &str,
        candidate_id: CandidateId,
        private_key: &PrivateKey,
        timestamp: i64,
    ) -> Result<CastReceipt> {
        let voter = self.authenticator.authenticate(election_code, voter_code).await?;
        check_candidate(&voter, candidate_id)?;
        if private_key.public_key() != voter.public_key {
            return Err(Error::InvalidKey(
                "private key does not belong to this voter".to_string(),
            ));
        }
        let signature = sign_vote(&voter.payload_voter_id(), candidate_id, private_key, timestamp)?;
        self.submit(voter, candidate_id, timestamp, signature, None)
            .await
    }

    /// Cast a vote signed elsewhere: authenticate, check the signature
    /// against the registered public key, submit it, then update the local
    /// flag. The proof is passed to the ledger untouched.
    pub async fn submit_signed(
        &self,
        election_code: &str,
        voter_code: &str,
        candidate_id: CandidateId,
        timestamp: i64,
        signature: Signature,
        proof: Option<EligibilityProof>,
    ) -> Result<CastReceipt> {
        let voter = self.authenticator.authenticate(election_code, voter_code).await?;
        check_candidate(&voter, candidate_id)?;
        let payload = VotePayload::new(voter.payload_voter_id(), candidate_id, timestamp);
        verify_payload(&payload, &voter.public_key, &signature)?;
        self.submit(voter, candidate_id, timestamp, signature, proof)
            .await
    }

    async fn submit(
        &self,
        voter: AuthenticatedVoter,
        candidate_id: CandidateId,
        timestamp: i64,
        signature: Signature,
        proof: Option<EligibilityProof>,
    ) -> Result<CastReceipt> {
        let election_id = voter.election.id;
        let result = self
            .submitter
            .submit_vote(
                election_id,
                candidate_id,
                &voter.public_key.to_hex(),
                &signature,
                proof,
            )
            .await;

        match result {
            Ok(tx) => {
                let reconciled = self.reconcile(voter.voter_id).await;
                info!("Vote cast in election {election_id}");
                Ok(CastReceipt {
                    tx,
                    voter_id: voter.payload_voter_id(),
                    candidate_id,
                    timestamp,
                    reconciled,
                })
            }
            Err(Error::DuplicateVote) => {
                // The ledger has a vote from this key, so the flag should be set too.
                self.reconcile(voter.voter_id).await;
                Err(Error::DuplicateVote)
            }
            Err(e) => Err(e),
        }
    }

    /// Mirror a ledger-confirmed vote into the local flag.
    ///
    /// Best-effort: the ledger already decided, so failures here are logged
    /// and never turn the vote into an error.
    async fn reconcile(&self, voter_id: Id) -> bool {
        match self.store.mark_voted(voter_id).await {
            Ok(()) => true,
            Err(StoreError::AlreadyVoted(_)) => {
                debug!("Voter {voter_id} was already marked as voted");
                true
            }
            Err(e) => {
                warn!("Failed to mark voter {voter_id} as voted: {e}");
                false
            }
        }
    }
}

fn check_candidate(voter: &AuthenticatedVoter, candidate_id: CandidateId) -> Result<()> {
    match voter.election.candidate(candidate_id) {
        Some(_) => Ok(()),
        None => Err(Error::UnknownCandidate {
            election_id: voter.election.id,
            candidate_id,
        }),
    }
}
