use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chainballot_protocol::{CandidateId, ElectionId};
use log::{debug, info, trace};
use rocket::tokio::sync::{broadcast, Mutex as AsyncMutex};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    ledger::DynLedger,
    store::{DynStore, StoreError},
};

/// Capacity of the update channel; slow subscribers miss older updates.
const EVENT_CAPACITY: usize = 64;

/// Votes per candidate at one point in time, as read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallySnapshot {
    pub election_id: ElectionId,
    pub counts: BTreeMap<CandidateId, u64>,
    /// Registered voters according to the credential store, not the ledger.
    pub registered_voters: u64,
    pub captured_at: DateTime<Utc>,
}

impl TallySnapshot {
    /// The snapshot an election is compared against before its first poll.
    pub fn empty(election_id: ElectionId) -> Self {
        Self {
            election_id,
            counts: BTreeMap::new(),
            registered_voters: 0,
            captured_at: Utc::now(),
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn participation(&self) -> Participation {
        Participation::new(self.total_votes(), self.registered_voters)
    }

    /// Do the per-candidate counts differ?
    pub fn differs_from(&self, other: &TallySnapshot) -> bool {
        self.counts != other.counts
    }
}

/// Turnout, derived from two independently sourced counts.
///
/// The ledger and the voter list may disagree slightly, so `rate` can exceed
/// 1.0; with no registered voters it is 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub votes_cast: u64,
    pub registered_voters: u64,
    pub rate: f64,
}

impl Participation {
    pub fn new(votes_cast: u64, registered_voters: u64) -> Self {
        let rate = if registered_voters == 0 {
            0.0
        } else {
            votes_cast as f64 / registered_voters as f64
        };
        Self {
            votes_cast,
            registered_voters,
            rate,
        }
    }

    pub fn percent(&self) -> f64 {
        self.rate * 100.0
    }
}

/// A detected change between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyUpdate {
    pub previous: TallySnapshot,
    pub current: TallySnapshot,
}

impl TallyUpdate {
    pub fn election_id(&self) -> ElectionId {
        self.current.election_id
    }

    /// Change per candidate, omitting candidates whose count did not move.
    pub fn deltas(&self) -> BTreeMap<CandidateId, i64> {
        let candidates = self
            .previous
            .counts
            .keys()
            .chain(self.current.counts.keys())
            .collect::<BTreeSet<_>>();
        candidates
            .into_iter()
            .filter_map(|candidate| {
                let before = self.previous.counts.get(candidate).copied().unwrap_or(0);
                let after = self.current.counts.get(candidate).copied().unwrap_or(0);
                let delta = after as i64 - before as i64;
                (delta != 0).then_some((*candidate, delta))
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum TallyEvent {
    Updated(Arc<TallyUpdate>),
}

impl TallyEvent {
    pub fn election_id(&self) -> ElectionId {
        match self {
            Self::Updated(update) => update.election_id(),
        }
    }
}

/// Reads tallies from the ledger and reports changes.
///
/// Holds no timers of its own: something else decides when to read. Reads of
/// one election are serialized, so at most one ledger read per election is
/// ever outstanding, whoever asked for it. Its only other mutable state is the
/// last snapshot per election.
pub struct TallyEngine {
    store: DynStore,
    ledger: DynLedger,
    latest: Mutex<HashMap<ElectionId, TallySnapshot>>,
    reads: Mutex<HashMap<ElectionId, Arc<AsyncMutex<()>>>>,
    events: broadcast::Sender<TallyEvent>,
}

impl TallyEngine {
    pub fn new(store: DynStore, ledger: DynLedger) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            ledger,
            latest: Mutex::default(),
            reads: Mutex::default(),
            events,
        }
    }

    /// Receive every update emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TallyEvent> {
        self.events.subscribe()
    }

    /// Read the current counts for every candidate, without touching the cache.
    ///
    /// Waits for any other read of the same election to finish first.
    pub async fn fetch(&self, election_id: ElectionId) -> Result<TallySnapshot> {
        let gate = self.read_gate(election_id)?;
        let _reading = gate.lock().await;
        self.read(election_id).await
    }

    /// The cached snapshot if it is younger than `max_age`, otherwise a fresh
    /// one read from the ledger and applied.
    ///
    /// Callers arriving while a read is in flight wait for it and then share
    /// its result instead of issuing their own.
    pub async fn refresh(&self, election_id: ElectionId, max_age: Duration) -> Result<TallySnapshot> {
        let gate = self.read_gate(election_id)?;
        let _reading = gate.lock().await;
        if let Some(snapshot) = self.latest(election_id) {
            let age = Utc::now().signed_duration_since(snapshot.captured_at);
            if age.to_std().map_or(true, |age| age < max_age) {
                trace!("Serving cached tally of election {election_id}");
                return Ok(snapshot);
            }
        }
        let snapshot = match self.read(election_id).await {
            Ok(snapshot) => snapshot,
            Err(err @ Error::ElectionNotFound(_)) => {
                // No gate to keep for an election that does not exist.
                if let Ok(mut reads) = self.reads.lock() {
                    reads.remove(&election_id);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        self.apply(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Read from the ledger now and apply the result.
    pub async fn poll_once(&self, election_id: ElectionId) -> Result<TallySnapshot> {
        self.refresh(election_id, Duration::ZERO).await
    }

    async fn read(&self, election_id: ElectionId) -> Result<TallySnapshot> {
        // Stamped before reading, so the counts are at least this recent.
        let captured_at = Utc::now();
        let election = match self.store.election(election_id).await {
            Ok(election) => election,
            Err(StoreError::NotFound) => {
                return Err(Error::ElectionNotFound(format!("ID {election_id}")))
            }
            Err(e) => return Err(e.into()),
        };
        let candidates = election.candidate_ids().collect::<Vec<_>>();
        let counts = self.ledger.vote_counts(election_id, &candidates).await?;
        let registered_voters = self.store.count_voters(election_id).await?;
        Ok(TallySnapshot {
            election_id,
            counts,
            registered_voters,
            captured_at,
        })
    }

    /// Make `snapshot` the latest for its election, emitting an update if
    /// any count changed since the previous one.
    ///
    /// A snapshot older than the cached one is dropped.
    pub fn apply(&self, snapshot: TallySnapshot) -> Result<Option<Arc<TallyUpdate>>> {
        self.apply_unless_cancelled(snapshot, &AtomicBool::new(false))
    }

    /// As [`TallyEngine::apply`], but discard the snapshot if `cancelled` is set.
    ///
    /// The flag is read under the cache lock, so a snapshot is either applied
    /// before cancellation completes or not at all.
    pub(crate) fn apply_unless_cancelled(
        &self,
        snapshot: TallySnapshot,
        cancelled: &AtomicBool,
    ) -> Result<Option<Arc<TallyUpdate>>> {
        let mut latest = self.lock()?;
        let election_id = snapshot.election_id;
        if cancelled.load(Ordering::SeqCst) {
            debug!("Discarding tally of election {election_id} read before cancellation");
            return Ok(None);
        }
        if let Some(current) = latest.get(&election_id) {
            if snapshot.captured_at < current.captured_at {
                debug!("Discarding out-of-order tally of election {election_id}");
                return Ok(None);
            }
        }
        let previous = latest
            .insert(election_id, snapshot.clone())
            .unwrap_or_else(|| TallySnapshot::empty(election_id));
        if !snapshot.differs_from(&previous) {
            return Ok(None);
        }

        let update = Arc::new(TallyUpdate {
            previous,
            current: snapshot,
        });
        info!(
            "Tally of election {election_id} changed: {:?}",
            update.deltas()
        );
        // Nobody listening is fine.
        let _ = self.events.send(TallyEvent::Updated(update.clone()));
        Ok(Some(update))
    }

    /// The last snapshot applied for an election.
    pub fn latest(&self, election_id: ElectionId) -> Option<TallySnapshot> {
        self.lock().ok()?.get(&election_id).cloned()
    }

    /// Drop the cached snapshot, so the next poll reports from empty.
    ///
    /// Waits for an in-flight read of the election, so that read cannot put
    /// the snapshot back afterwards.
    pub async fn forget(&self, election_id: ElectionId) {
        let gate = match self.read_gate(election_id) {
            Ok(gate) => gate,
            Err(_) => return,
        };
        let _reading = gate.lock().await;
        if let Ok(mut latest) = self.lock() {
            latest.remove(&election_id);
        }
    }

    /// The lock serializing ledger reads of one election.
    fn read_gate(&self, election_id: ElectionId) -> Result<Arc<AsyncMutex<()>>> {
        let mut reads = self.reads.lock().map_err(|_| poisoned())?;
        Ok(reads.entry(election_id).or_default().clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ElectionId, TallySnapshot>>> {
        self.latest.lock().map_err(|_| poisoned())
    }
}

fn poisoned() -> Error {
    Error::Status(
        rocket::http::Status::InternalServerError,
        "Tally cache lock poisoned".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use chainballot_protocol::{generate_keypair, hash_access_code};
    use rocket::futures::future::join_all;
    use rocket::tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::model::db::election::ElectionCore;
    use crate::store::{CredentialStore, MemoryStore};

    async fn register_voters(store: &MemoryStore, election_id: ElectionId, count: usize) {
        for i in 0..count {
            let (_, public_key) = generate_keypair().unwrap();
            store
                .register_voter(election_id, hash_access_code(&format!("CODE{i}")), public_key)
                .await
                .unwrap();
        }
    }

    fn engine(store: &MemoryStore, ledger: &MemoryLedger) -> TallyEngine {
        TallyEngine::new(Arc::new(store.clone()), Arc::new(ledger.clone()))
    }

    #[backend_test]
    async fn three_candidates_five_voters(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        register_voters(&store, election.id, 5).await;
        ledger.cast_votes(election.id, 1, 2).await;
        ledger.cast_votes(election.id, 2, 1).await;

        let snapshot = engine(&store, &ledger).poll_once(election.id).await.unwrap();
        assert_eq!(
            snapshot.counts.into_iter().collect::<Vec<_>>(),
            vec![(1, 2), (2, 1), (3, 0)]
        );
        let participation = Participation::new(3, 5);
        assert_eq!(participation.rate, 0.6);
        assert_eq!(snapshot.registered_voters, 5);
    }

    #[backend_test]
    async fn unchanged_ledger_emits_nothing(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let engine = engine(&store, &ledger);
        let mut events = engine.subscribe();

        // The first poll reports from empty, even with no votes.
        engine.poll_once(election.id).await.unwrap();
        let TallyEvent::Updated(first) = events.try_recv().unwrap();
        assert!(first.previous.counts.is_empty());
        assert!(first.deltas().is_empty());

        engine.poll_once(election.id).await.unwrap();
        engine.poll_once(election.id).await.unwrap();
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[backend_test]
    async fn updates_carry_both_snapshots(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let engine = engine(&store, &ledger);
        engine.poll_once(election.id).await.unwrap();
        let mut events = engine.subscribe();

        ledger.cast_votes(election.id, 3, 3).await;
        ledger.cast_votes(election.id, 1, 1).await;
        engine.poll_once(election.id).await.unwrap();

        let TallyEvent::Updated(update) = events.try_recv().unwrap();
        assert_eq!(update.election_id(), election.id);
        assert_eq!(update.previous.total_votes(), 0);
        assert_eq!(update.current.total_votes(), 4);
        assert_eq!(
            update.deltas().into_iter().collect::<Vec<_>>(),
            vec![(1, 1), (3, 3)]
        );
    }

    #[backend_test]
    async fn participation_never_decreases(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        register_voters(&store, election.id, 4).await;
        let engine = engine(&store, &ledger);

        let mut last_rate = 0.0;
        for candidate in [1, 2, 2, 3] {
            ledger.cast_votes(election.id, candidate, 1).await;
            let rate = engine
                .poll_once(election.id)
                .await
                .unwrap()
                .participation()
                .rate;
            assert!(rate >= last_rate);
            assert!(rate <= 1.0);
            last_rate = rate;
        }
        assert_eq!(last_rate, 1.0);
    }

    #[backend_test]
    async fn forget_resets_to_empty(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let engine = engine(&store, &ledger);
        engine.poll_once(election.id).await.unwrap();
        assert!(engine.latest(election.id).is_some());

        engine.forget(election.id).await;
        assert!(engine.latest(election.id).is_none());
        let mut events = engine.subscribe();
        engine.poll_once(election.id).await.unwrap();
        assert!(events.try_recv().is_ok());
    }

    #[backend_test]
    async fn cancelled_snapshots_are_discarded(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let engine = engine(&store, &ledger);
        let mut events = engine.subscribe();

        let snapshot = engine.fetch(election.id).await.unwrap();
        let applied = engine
            .apply_unless_cancelled(snapshot, &AtomicBool::new(true))
            .unwrap();
        assert!(applied.is_none());
        assert!(engine.latest(election.id).is_none());
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[backend_test]
    async fn older_snapshots_never_replace_newer(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let engine = engine(&store, &ledger);
        let stale = engine.fetch(election.id).await.unwrap();
        ledger.cast_votes(election.id, 1, 2).await;
        let fresh = engine.poll_once(election.id).await.unwrap();
        let mut events = engine.subscribe();

        // A slow read that started first and finished last.
        let stale = TallySnapshot {
            captured_at: fresh.captured_at - chrono::Duration::seconds(1),
            ..stale
        };
        assert!(engine.apply(stale).unwrap().is_none());
        assert_eq!(engine.latest(election.id), Some(fresh));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[backend_test]
    async fn concurrent_refreshes_share_one_read(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        ledger.cast_votes(election.id, 2, 1).await;
        ledger.set_read_delay(Duration::from_millis(50));
        let engine = Arc::new(engine(&store, &ledger));

        let refreshes = (0..5).map(|_| {
            let engine = engine.clone();
            rocket::tokio::spawn(async move {
                engine.refresh(election.id, Duration::from_secs(60)).await
            })
        });
        let snapshots = join_all(refreshes)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect::<Vec<_>>();

        assert!(snapshots.iter().all(|s| s == &snapshots[0]));
        assert_eq!(snapshots[0].counts.get(&2), Some(&1));
        assert_eq!(ledger.max_reads_in_flight(), 1);
        // One count per candidate, read once.
        assert_eq!(ledger.read_count(), 3);
    }

    #[backend_test]
    async fn stale_cache_is_read_again(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let engine = engine(&store, &ledger);
        let max_age = Duration::from_millis(100);
        engine.refresh(election.id, max_age).await.unwrap();

        ledger.cast_votes(election.id, 3, 2).await;
        let cached = engine.refresh(election.id, max_age).await.unwrap();
        assert_eq!(cached.counts.get(&3), Some(&0));

        rocket::tokio::time::sleep(Duration::from_millis(150)).await;
        let fresh = engine.refresh(election.id, max_age).await.unwrap();
        assert_eq!(fresh.counts.get(&3), Some(&2));
    }

    #[backend_test]
    async fn failures_are_reported(store: MemoryStore, ledger: MemoryLedger) {
        let engine = engine(&store, &ledger);
        assert!(matches!(
            engine.poll_once(42).await,
            Err(Error::ElectionNotFound(_))
        ));

        let election = store.create_election(ElectionCore::example()).await.unwrap();
        ledger.set_offline(true);
        assert!(matches!(
            engine.poll_once(election.id).await,
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn participation_with_no_voters_is_zero() {
        let participation = Participation::new(3, 0);
        assert_eq!(participation.rate, 0.0);
        assert_eq!(participation.percent(), 0.0);
        assert_eq!(Participation::new(1, 4).percent(), 25.0);
    }
}
