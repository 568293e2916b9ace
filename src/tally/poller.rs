use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainballot_protocol::ElectionId;
use log::{debug, trace, warn};
use rocket::futures::future::{BoxFuture, FutureExt};
use rocket::tokio::{
    self,
    sync::Notify,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::error::Result;

use super::{TallyEngine, TallySnapshot};

/// What the poll loop is doing right now.
enum PollState {
    Idle,
    Polling(BoxFuture<'static, Result<TallySnapshot>>),
}

/// What woke the poll loop.
enum Wake {
    Tick,
    Done(Result<TallySnapshot>),
    Stop,
}

/// A scheduler task polling one election on a fixed interval.
///
/// At most one poll is in flight at a time: a tick that arrives while a poll is
/// running is skipped, not queued. After [`TallyPoller::cancel`] returns, no
/// further snapshot from this poller is applied.
pub struct TallyPoller {
    election_id: ElectionId,
    task: Option<JoinHandle<()>>,
    trigger: Arc<Notify>,
    stop: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl TallyPoller {
    /// Start polling immediately, then every `period`.
    pub fn start(engine: Arc<TallyEngine>, election_id: ElectionId, period: Duration) -> Self {
        let trigger = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(
            engine,
            election_id,
            period,
            trigger.clone(),
            stop.clone(),
            cancelled.clone(),
        ));
        debug!("Started tally poller for election {election_id}");
        Self {
            election_id,
            task: Some(task),
            trigger,
            stop,
            cancelled,
        }
    }

    pub fn election_id(&self) -> ElectionId {
        self.election_id
    }

    /// Poll now instead of waiting for the next tick.
    /// Has no effect if a poll is already in flight.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Stop polling and wait for the task to finish.
    pub async fn cancel(mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop.notify_one();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Tally poller for election {} ended badly: {e}", self.election_id);
            }
        }
        debug!("Stopped tally poller for election {}", self.election_id);
    }
}

impl Drop for TallyPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.cancelled.store(true, Ordering::SeqCst);
            task.abort();
        }
    }
}

async fn run(
    engine: Arc<TallyEngine>,
    election_id: ElectionId,
    period: Duration,
    trigger: Arc<Notify>,
    stop: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = PollState::Idle;

    loop {
        let wake = match &mut state {
            PollState::Idle => tokio::select! {
                _ = stop.notified() => Wake::Stop,
                _ = ticker.tick() => Wake::Tick,
                _ = trigger.notified() => Wake::Tick,
            },
            PollState::Polling(poll) => tokio::select! {
                _ = stop.notified() => Wake::Stop,
                result = poll => Wake::Done(result),
                _ = ticker.tick() => Wake::Tick,
                _ = trigger.notified() => Wake::Tick,
            },
        };

        match wake {
            Wake::Stop => break,
            Wake::Tick => match state {
                PollState::Idle => {
                    let engine = engine.clone();
                    let poll = async move { engine.fetch(election_id).await }.boxed();
                    state = PollState::Polling(poll);
                }
                PollState::Polling(_) => {
                    trace!("Poll of election {election_id} still in flight, skipping tick");
                }
            },
            Wake::Done(result) => {
                state = PollState::Idle;
                match result {
                    Ok(snapshot) => {
                        if let Err(e) = engine.apply_unless_cancelled(snapshot, &cancelled) {
                            warn!("Failed to apply tally of election {election_id}: {e}");
                        }
                    }
                    Err(e) => warn!("Failed to poll tally of election {election_id}: {e}"),
                }
            }
        }
    }
}
