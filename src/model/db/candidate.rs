use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core candidate data, as stored in the database.
///
/// Candidate CRUD belongs to the administration subsystem. The engine
/// validates selections against these documents and owns the single
/// code path that increments `vote_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    /// Foreign key election ID.
    pub election_id: Id,
    /// Foreign key position ID.
    pub position_id: Id,
    /// Ballot number, unique within (election, position).
    pub candidate_number: u32,
    /// Display name.
    pub name: String,
    /// Withdrawn or disqualified candidates are kept but deactivated.
    pub active: bool,
    /// Denormalized tally cache. Incremented only inside the vote
    /// recording transaction; always recomputable from the votes
    /// collection and never trusted as the sole source of truth.
    pub vote_count: u64,
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}
