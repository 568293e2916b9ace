use std::ops::Deref;

use chrono::{DateTime, Utc};
use chainballot_protocol::{CandidateId, ElectionId};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

/// A candidate standing in an election.
///
/// Candidate IDs are referenced by the ledger as vote targets, so they are
/// fixed at creation and never renumbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Core election data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    /// Public access code shared with every voter; unique and immutable.
    pub code: String,
    /// Election name.
    pub name: String,
    /// Election start time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// Election end time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Candidates, in declaration order.
    pub candidates: Vec<Candidate>,
}

impl ElectionCore {
    /// Is voting open at the given instant?
    pub fn is_open_at(&self, instant: DateTime<Utc>) -> bool {
        self.start_time <= instant && instant < self.end_time
    }

    /// Look up a candidate by ID.
    pub fn candidate(&self, id: CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    /// All candidate IDs, in declaration order.
    pub fn candidate_ids(&self) -> impl Iterator<Item = CandidateId> + '_ {
        self.candidates.iter().map(|c| c.id)
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: ElectionId,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Election {
    pub fn new(id: ElectionId, election: ElectionCore) -> Self {
        Self { id, election }
    }
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn open_window_is_half_open() {
        let election = ElectionCore::example();
        assert!(election.is_open_at(election.start_time));
        assert!(election.is_open_at(Utc::now()));
        assert!(!election.is_open_at(election.end_time));
        assert!(!election.is_open_at(election.start_time - Duration::seconds(1)));
    }

    #[test]
    fn candidate_lookup() {
        let election = ElectionCore::example();
        assert_eq!(election.candidate(2).map(|c| c.name.as_str()), Some("Bob"));
        assert!(election.candidate(4).is_none());
        assert_eq!(election.candidate_ids().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
