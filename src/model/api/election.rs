use chrono::{DateTime, Utc};
use chainballot_protocol::{CandidateId, ElectionId};
use serde::{Deserialize, Serialize};

use crate::model::db::election::{Candidate, Election, ElectionCore};

/// An election specification, as submitted by an organizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    /// Election name.
    pub name: String,
    /// Election start time.
    pub start_time: DateTime<Utc>,
    /// Election end time.
    pub end_time: DateTime<Utc>,
    /// Candidates, in the order they should be numbered.
    pub candidates: Vec<CandidateSpec>,
}

impl ElectionSpec {
    /// Convert this spec into election data with the given public code.
    /// Candidates are numbered `1..=n` in declaration order.
    pub fn into_election(self, code: String) -> ElectionCore {
        ElectionCore {
            code,
            name: self.name,
            start_time: self.start_time,
            end_time: self.end_time,
            candidates: self
                .candidates
                .into_iter()
                .enumerate()
                .map(|(i, c)| c.into_candidate(1 + i as CandidateId))
                .collect(),
        }
    }
}

/// A candidate specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CandidateSpec {
    /// Convert this spec into a candidate with the given ID.
    pub fn into_candidate(self, id: CandidateId) -> Candidate {
        Candidate {
            id,
            name: self.name,
            description: self.description,
        }
    }
}

/// An election as presented to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionDescription {
    pub id: ElectionId,
    pub code: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub candidates: Vec<Candidate>,
}

impl From<Election> for ElectionDescription {
    fn from(election: Election) -> Self {
        let Election { id, election } = election;
        Self {
            id,
            code: election.code,
            name: election.name,
            start_time: election.start_time,
            end_time: election.end_time,
            candidates: election.candidates,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_numbered_from_one_in_order() {
        let election = ElectionSpec::current_example().into_election("ABC123".to_string());
        let numbered = election
            .candidates
            .iter()
            .map(|c| (c.id, c.name.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(numbered, vec![(1, "Alice"), (2, "Bob"), (3, "Carol")]);
        assert_eq!(election.code, "ABC123");
    }
}
