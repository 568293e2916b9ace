use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chainballot_protocol::ElectionId;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{self, sync::Mutex, task::JoinHandle},
    Build, Orbit, Rocket,
};

use crate::{
    config::Config,
    error::Result,
    ledger::DynLedger,
    model::db::election::Election,
    store::DynStore,
};

use super::{TallyEngine, TallyPoller, TallySnapshot};

type Pollers = Arc<Mutex<HashMap<ElectionId, TallyPoller>>>;

/// Tally pollers, one per observed election, plus the elections waiting for
/// their voting window to open before being observed.
pub struct TallyWatchers {
    engine: Arc<TallyEngine>,
    period: Duration,
    pollers: Pollers,
    scheduled: Mutex<HashMap<ElectionId, JoinHandle<()>>>,
}

impl TallyWatchers {
    pub fn new(engine: Arc<TallyEngine>, period: Duration) -> Self {
        Self {
            engine,
            period,
            pollers: Default::default(),
            scheduled: Default::default(),
        }
    }

    pub fn engine(&self) -> &Arc<TallyEngine> {
        &self.engine
    }

    /// The tally of an election, no older than one poll interval.
    ///
    /// Watched elections are normally served from the cache their poller keeps
    /// fresh. Anything else is read from the ledger, sharing any read already
    /// in flight for the same election.
    pub async fn current(&self, election_id: ElectionId) -> Result<TallySnapshot> {
        self.engine.refresh(election_id, self.period).await
    }

    /// Start polling the given election.
    /// Returns false if it was already being watched.
    pub async fn watch(&self, election_id: ElectionId) -> bool {
        start_poller(&self.pollers, &self.engine, election_id, self.period).await
    }

    /// Start polling the given election once its voting window opens, or now
    /// if it already has.
    /// Returns false if it was already being watched or scheduled.
    pub async fn watch_from(&self, election: &Election) -> bool {
        let election_id = election.id;
        if election.start_time <= Utc::now() {
            return self.watch(election_id).await;
        }
        if self.is_watching(election_id).await {
            return false;
        }

        let mut scheduled = self.scheduled.lock().await;
        if scheduled
            .get(&election_id)
            .map_or(false, |task| !task.is_finished())
        {
            return false;
        }
        let wait = until(election.start_time);
        let pollers = self.pollers.clone();
        let engine = self.engine.clone();
        let period = self.period;
        let task = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if start_poller(&pollers, &engine, election_id, period).await {
                info!("Voting opened in election {election_id}, watching its tally");
            }
        });
        debug!("Tally of election {election_id} will be watched from {}", election.start_time);
        scheduled.insert(election_id, task);
        true
    }

    /// Stop polling the given election, or cancel its scheduled start, and
    /// drop its cached snapshot.
    /// Returns false if it was neither watched nor scheduled.
    pub async fn unwatch(&self, election_id: ElectionId) -> bool {
        let pending = self.scheduled.lock().await.remove(&election_id);
        if let Some(task) = &pending {
            task.abort();
        }
        let poller = self.pollers.lock().await.remove(&election_id);
        let was_polling = poller.is_some();
        if let Some(poller) = poller {
            poller.cancel().await;
        }
        if was_polling || pending.is_some() {
            self.engine.forget(election_id).await;
            true
        } else {
            false
        }
    }

    pub async fn is_watching(&self, election_id: ElectionId) -> bool {
        self.pollers.lock().await.contains_key(&election_id)
    }

    /// Poll the given election now, if it is being watched.
    pub async fn trigger(&self, election_id: ElectionId) -> bool {
        match self.pollers.lock().await.get(&election_id) {
            Some(poller) => {
                poller.trigger_now();
                true
            }
            None => false,
        }
    }

    /// Watch every election that is open right now, and schedule every
    /// election that has yet to open.
    /// Returns how many were watched and how many scheduled.
    pub async fn watch_known_elections(&self, store: &DynStore) -> Result<(usize, usize)> {
        let now = Utc::now();
        let mut started = 0;
        for election in store.open_elections(now).await? {
            if self.watch(election.id).await {
                started += 1;
            }
        }
        let mut waiting = 0;
        for election in store.upcoming_elections(now).await? {
            if self.watch_from(&election).await {
                waiting += 1;
            }
        }
        Ok((started, waiting))
    }

    /// Stop every poller and scheduled start.
    pub async fn shutdown(&self) {
        for (_, task) in std::mem::take(&mut *self.scheduled.lock().await) {
            task.abort();
        }
        let pollers = std::mem::take(&mut *self.pollers.lock().await);
        for (_, poller) in pollers {
            poller.cancel().await;
        }
    }
}

async fn start_poller(
    pollers: &Pollers,
    engine: &Arc<TallyEngine>,
    election_id: ElectionId,
    period: Duration,
) -> bool {
    let mut pollers = pollers.lock().await;
    if pollers.contains_key(&election_id) {
        return false;
    }
    let poller = TallyPoller::start(engine.clone(), election_id, period);
    pollers.insert(election_id, poller);
    true
}

/// Time from now until `instant`, or zero if it has passed.
fn until(instant: DateTime<Utc>) -> Duration {
    let millis = instant.timestamp_millis() - Utc::now().timestamp_millis();
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

/// A fairing that builds the tally engine, starts watching every open
/// election, schedules the ones yet to open, and places a `TallyWatchers` into managed state.
/// This fairing depends on the store, the ledger and the config being in
/// managed state, and so must be attached after the fairings responsible.
pub struct TallyFairing;

#[rocket::async_trait]
impl Fairing for TallyFairing {
    fn info(&self) -> Info {
        Info {
            name: "Tally Watchers",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (store, ledger, period) = match (
            rocket.state::<DynStore>(),
            rocket.state::<DynLedger>(),
            rocket.state::<Config>(),
        ) {
            (Some(store), Some(ledger), Some(config)) => {
                (store.clone(), ledger.clone(), config.tally_poll_interval())
            }
            _ => {
                error!("Store, ledger and config must be available before starting tally watchers");
                return Err(rocket);
            }
        };

        info!("Starting tally watchers...");
        let engine = Arc::new(TallyEngine::new(store.clone(), ledger));
        let watchers = TallyWatchers::new(engine, period);
        match watchers.watch_known_elections(&store).await {
            Ok((open, upcoming)) => {
                info!("...watching {open} open elections, {upcoming} more once they open!")
            }
            Err(e) => {
                error!("Failed to start tally watchers: {e}");
                return Err(rocket);
            }
        }

        // Manage the state.
        rocket = rocket.manage(watchers);
        Ok(rocket)
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(watchers) = rocket.state::<TallyWatchers>() {
            watchers.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::tokio::time::timeout;

    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::model::db::election::ElectionCore;
    use crate::store::{CredentialStore, MemoryStore};
    use crate::tally::TallyEvent;

    fn watchers(store: &MemoryStore, ledger: &MemoryLedger) -> TallyWatchers {
        let engine = TallyEngine::new(Arc::new(store.clone()), Arc::new(ledger.clone()));
        TallyWatchers::new(Arc::new(engine), Duration::from_millis(20))
    }

    #[backend_test]
    async fn watch_and_unwatch(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        let watchers = watchers(&store, &ledger);
        let mut events = watchers.engine().subscribe();

        assert!(watchers.watch(election.id).await);
        assert!(!watchers.watch(election.id).await);
        assert!(watchers.is_watching(election.id).await);
        timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(watchers.trigger(election.id).await);

        assert!(watchers.unwatch(election.id).await);
        assert!(!watchers.unwatch(election.id).await);
        assert!(!watchers.is_watching(election.id).await);
        assert!(!watchers.trigger(election.id).await);
        assert!(watchers.engine().latest(election.id).is_none());
    }

    #[backend_test]
    async fn open_elections_are_watched_and_upcoming_scheduled(
        store: MemoryStore,
        ledger: MemoryLedger,
    ) {
        let open = store.create_election(ElectionCore::example()).await.unwrap();
        let mut future = ElectionCore::example();
        future.code = "LATER1".to_string();
        future.start_time = future.end_time;
        future.end_time = future.start_time + chrono::Duration::days(1);
        let future = store.create_election(future).await.unwrap();

        let watchers = watchers(&store, &ledger);
        let dyn_store: DynStore = Arc::new(store.clone());
        assert_eq!(watchers.watch_known_elections(&dyn_store).await.unwrap(), (1, 1));
        assert!(watchers.is_watching(open.id).await);
        assert!(!watchers.is_watching(future.id).await);
        // Already scheduled.
        assert!(!watchers.watch_from(&future).await);

        watchers.shutdown().await;
        assert!(!watchers.is_watching(open.id).await);
        assert!(watchers.watch_from(&future).await);
        watchers.shutdown().await;
    }

    #[backend_test]
    async fn watching_starts_when_voting_opens(store: MemoryStore, ledger: MemoryLedger) {
        let mut soon = ElectionCore::example();
        soon.start_time = Utc::now() + chrono::Duration::milliseconds(200);
        let soon = store.create_election(soon).await.unwrap();
        let watchers = watchers(&store, &ledger);
        let mut events = watchers.engine().subscribe();

        assert!(watchers.watch_from(&soon).await);
        assert!(!watchers.is_watching(soon.id).await);

        // The first poll after opening reports from empty.
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.election_id(), soon.id);
        assert!(watchers.is_watching(soon.id).await);

        ledger.cast_votes(soon.id, 1, 2).await;
        let TallyEvent::Updated(update) = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.current.counts.get(&1), Some(&2));

        watchers.shutdown().await;
    }

    #[backend_test]
    async fn unwatching_a_scheduled_election_cancels_it(store: MemoryStore, ledger: MemoryLedger) {
        let mut soon = ElectionCore::example();
        soon.start_time = Utc::now() + chrono::Duration::milliseconds(100);
        let soon = store.create_election(soon).await.unwrap();
        let watchers = watchers(&store, &ledger);

        assert!(watchers.watch_from(&soon).await);
        assert!(watchers.unwatch(soon.id).await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!watchers.is_watching(soon.id).await);
        assert!(!watchers.unwatch(soon.id).await);
    }

    #[backend_test]
    async fn unwatch_waits_out_reads_in_flight(store: MemoryStore, ledger: MemoryLedger) {
        let election = store.create_election(ElectionCore::example()).await.unwrap();
        ledger.set_read_delay(Duration::from_millis(50));
        let watchers = Arc::new(watchers(&store, &ledger));

        assert!(watchers.watch(election.id).await);
        let reader = {
            let watchers = watchers.clone();
            tokio::spawn(async move { watchers.current(election.id).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(watchers.unwatch(election.id).await);
        reader.await.unwrap().unwrap();
        assert!(watchers.engine().latest(election.id).is_none());
    }

    #[test]
    fn until_is_never_negative() {
        assert_eq!(until(Utc::now() - chrono::Duration::seconds(5)), Duration::ZERO);
        assert!(until(Utc::now() + chrono::Duration::seconds(5)) > Duration::from_secs(4));
    }
}
