use chainballot_protocol::{CandidateId, ElectionId, PublicKey, Signature};
use log::{error, info, warn};

use crate::error::{Error, Result};

use super::{DynLedger, EligibilityProof, LedgerVote, TxHandle};

/// Sends signed votes to the ledger and translates its answers.
#[derive(Clone)]
pub struct LedgerSubmitter {
    ledger: DynLedger,
}

impl LedgerSubmitter {
    pub fn new(ledger: DynLedger) -> Self {
        Self { ledger }
    }

    /// Submit a signed vote.
    ///
    /// The public key is normalized to its 32-byte form first; a malformed key
    /// fails with [`Error::InvalidPublicKey`] and the ledger is never called.
    /// An "already voted" revert becomes [`Error::DuplicateVote`], which is a
    /// normal outcome under concurrent submission and must not be retried.
    pub async fn submit_vote(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
        voter_public_key: &str,
        signature: &Signature,
        proof: Option<EligibilityProof>,
    ) -> Result<TxHandle> {
        let voter_public_key = PublicKey::from_hex(voter_public_key)?;
        let vote = LedgerVote {
            election_id,
            candidate_id,
            voter_public_key,
            signature: signature.clone(),
            proof,
        };

        match self.ledger.submit_vote(&vote).await {
            Ok(tx) => {
                info!("Ledger accepted vote in election {election_id} as {tx}");
                Ok(tx)
            }
            Err(e) => {
                let err = Error::from(e);
                match err {
                    Error::DuplicateVote => {
                        info!("Ledger already holds a vote from this voter in election {election_id}")
                    }
                    Error::Transport(ref reason) => {
                        warn!("Ledger unreachable for election {election_id}: {reason}")
                    }
                    ref other => error!("Ledger refused vote in election {election_id}: {other}"),
                }
                Err(err)
            }
        }
    }
}
