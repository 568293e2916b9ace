use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chainballot_protocol::{CandidateId, ElectionId, PublicKey, Signature};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use rocket::tokio;
use sha2::{Digest, Sha256};

use super::{EligibilityProof, Ledger, LedgerError, LedgerResult, LedgerVote, TxHandle};

/// A vote held by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRecord {
    pub candidate_id: CandidateId,
    pub signature: Signature,
    pub proof: Option<EligibilityProof>,
    pub tx: TxHandle,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    records: Mutex<HashMap<(ElectionId, PublicKey), VoteRecord>>,
    offline: AtomicBool,
    submissions: AtomicUsize,
    read_delay_ms: AtomicU64,
    reads: AtomicUsize,
    reads_in_flight: AtomicUsize,
    max_reads_in_flight: AtomicUsize,
}

/// An in-process ledger enforcing one vote per (election, voter key).
///
/// Meant for development and tests; clones share the same records. It can be
/// taken offline and slowed down to exercise failure and overlap handling.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails as a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every count read by the given duration.
    pub fn set_read_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.read_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of `submit_vote` calls that reached the ledger, accepted or not.
    pub fn submission_count(&self) -> usize {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    /// Number of count reads started, finished or not.
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// The most count reads ever in flight at once.
    pub fn max_reads_in_flight(&self) -> usize {
        self.inner.max_reads_in_flight.load(Ordering::SeqCst)
    }

    /// The vote recorded for a voter key, if any.
    pub fn record(&self, election_id: ElectionId, voter: &PublicKey) -> Option<VoteRecord> {
        self.records()
            .ok()?
            .get(&(election_id, voter.clone()))
            .cloned()
    }

    fn records(
        &self,
    ) -> LedgerResult<std::sync::MutexGuard<'_, HashMap<(ElectionId, PublicKey), VoteRecord>>> {
        self.inner
            .records
            .lock()
            .map_err(|_| LedgerError::Transport("memory ledger lock poisoned".to_string()))
    }

    fn check_online(&self) -> LedgerResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(LedgerError::Transport("ledger is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Tracks a read in flight, including reads abandoned mid-way.
struct ReadGuard<'a>(&'a Inner);

impl<'a> ReadGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        inner.reads.fetch_add(1, Ordering::SeqCst);
        let in_flight = inner.reads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_reads_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.0.reads_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic transaction hash of an accepted vote.
fn tx_hash(vote: &LedgerVote) -> TxHandle {
    let mut hasher = Sha256::new();
    hasher.update(vote.election_id.to_be_bytes());
    hasher.update(vote.voter_public_key.to_bytes());
    hasher.update(vote.signature.to_bytes());
    TxHandle(format!("0x{}", HEXLOWER.encode(&hasher.finalize())))
}

#[rocket::async_trait]
impl Ledger for MemoryLedger {
    async fn submit_vote(&self, vote: &LedgerVote) -> LedgerResult<TxHandle> {
        self.check_online()?;
        self.inner.submissions.fetch_add(1, Ordering::SeqCst);

        // Check and insert under one lock so racing submissions see each other.
        let mut records = self.records()?;
        let key = (vote.election_id, vote.voter_public_key.clone());
        if records.contains_key(&key) {
            warn!(
                "Rejected second vote in election {} from {}",
                vote.election_id, vote.voter_public_key
            );
            return Err(LedgerError::Revert("Voter has already voted".to_string()));
        }
        let tx = tx_hash(vote);
        records.insert(
            key,
            VoteRecord {
                candidate_id: vote.candidate_id,
                signature: vote.signature.clone(),
                proof: vote.proof.clone(),
                tx: tx.clone(),
                recorded_at: Utc::now(),
            },
        );
        debug!("Recorded vote in election {} as {tx}", vote.election_id);
        Ok(tx)
    }

    async fn vote_count(
        &self,
        election_id: ElectionId,
        candidate_id: CandidateId,
    ) -> LedgerResult<u64> {
        self.check_online()?;

        let _read = ReadGuard::enter(&self.inner);
        let delay = self.inner.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.records().map(|records| {
            records
                .iter()
                .filter(|((election, _), record)| {
                    *election == election_id && record.candidate_id == candidate_id
                })
                .count() as u64
        })
    }
}
