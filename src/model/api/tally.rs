use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Per-candidate tally: the denormalized cache next to the recount from
/// the votes collection. The recount is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: Id,
    pub cached: u64,
    pub counted: u64,
}

/// Ballot count for an election, optionally filtered by submission state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCount {
    pub count: u64,
}
