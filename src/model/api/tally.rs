use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use chainballot_protocol::{CandidateId, ElectionId};
use serde::{Deserialize, Serialize};

use crate::tally::{Participation, TallySnapshot, TallyUpdate};

/// The latest known tally of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyDesc {
    pub election_id: ElectionId,
    pub counts: BTreeMap<CandidateId, u64>,
    pub captured_at: DateTime<Utc>,
    pub participation: Participation,
}

impl From<&TallySnapshot> for TallyDesc {
    fn from(snapshot: &TallySnapshot) -> Self {
        Self {
            election_id: snapshot.election_id,
            counts: snapshot.counts.clone(),
            captured_at: snapshot.captured_at,
            participation: snapshot.participation(),
        }
    }
}

/// A change in the tally, as streamed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyUpdateDesc {
    pub election_id: ElectionId,
    pub previous: BTreeMap<CandidateId, u64>,
    pub current: BTreeMap<CandidateId, u64>,
    /// Per-candidate change; candidates whose count did not move are omitted.
    pub deltas: BTreeMap<CandidateId, i64>,
    pub captured_at: DateTime<Utc>,
    pub participation: Participation,
}

impl From<&TallyUpdate> for TallyUpdateDesc {
    fn from(update: &TallyUpdate) -> Self {
        Self {
            election_id: update.current.election_id,
            previous: update.previous.counts.clone(),
            current: update.current.counts.clone(),
            deltas: update.deltas(),
            captured_at: update.current.captured_at,
            participation: update.current.participation(),
        }
    }
}
