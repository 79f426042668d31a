use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// One recorded selection: ballot, position, candidate.
///
/// Immutable once written. Votes are only ever inserted by the vote
/// recording transaction that also marks their ballot submitted, and only
/// ever deleted by an election-level cascading delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Foreign key ballot ID.
    pub ballot_id: Id,
    /// Foreign key election ID, denormalized for cascade deletes.
    pub election_id: Id,
    /// Foreign key position ID.
    pub position_id: Id,
    /// Foreign key candidate ID.
    pub candidate_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(
        ballot_id: Id,
        election_id: Id,
        position_id: Id,
        candidate_id: Id,
        cast_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            ballot_id,
            election_id,
            position_id,
            candidate_id,
            cast_at,
        }
    }
}
