use chainballot_protocol::ElectionId;
use log::{debug, warn};
use rocket::{
    response::stream::{Event, EventStream},
    serde::json::Json,
    tokio::{select, sync::broadcast::error::RecvError},
    Route, Shutdown, State,
};

use crate::{
    error::{Error, Result},
    model::api::{
        election::ElectionDescription,
        tally::{TallyDesc, TallyUpdateDesc},
    },
    store::{DynStore, StoreError},
    tally::{TallyEvent, TallyWatchers},
};

pub fn routes() -> Vec<Route> {
    routes![election_by_code, tally, tally_events]
}

#[get("/elections/code/<code>", rank = 1)]
async fn election_by_code(
    code: &str,
    store: &State<DynStore>,
) -> Result<Json<ElectionDescription>> {
    let code = code.trim().to_ascii_uppercase();
    match store.election_by_code(&code).await {
        Ok(election) => Ok(Json(election.into())),
        Err(StoreError::NotFound) => Err(Error::ElectionNotFound(format!("code {code}"))),
        Err(e) => Err(e.into()),
    }
}

/// The tally as of at most one poll interval ago.
#[get("/elections/<election_id>/tally", rank = 2)]
async fn tally(election_id: ElectionId, watchers: &State<TallyWatchers>) -> Result<Json<TallyDesc>> {
    let snapshot = watchers.current(election_id).await?;
    Ok(Json(TallyDesc::from(&snapshot)))
}

/// Stream every tally change of an election as server-sent events, until
/// the client goes away or the server shuts down.
#[get("/elections/<election_id>/tally/events")]
fn tally_events(
    election_id: ElectionId,
    watchers: &State<TallyWatchers>,
    mut shutdown: Shutdown,
) -> EventStream![] {
    let mut events = watchers.engine().subscribe();
    EventStream! {
        loop {
            let event = select! {
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Tally stream for election {election_id} skipped {missed} updates");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };
            if event.election_id() != election_id {
                continue;
            }
            match event {
                TallyEvent::Updated(update) => {
                    debug!("Streaming tally update for election {election_id}");
                    yield Event::json(&TallyUpdateDesc::from(update.as_ref())).event("tally");
                }
            }
        }
    }
}
