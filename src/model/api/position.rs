use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{common::election::YearLevel, db::position::Position, mongodb::Id};

/// Public description of a position, as returned by the sequencer query
/// and the committee window operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDescription {
    pub id: Id,
    pub name: String,
    pub order: u32,
    pub max_votes: u32,
    pub allowed_year_levels: Option<HashSet<YearLevel>>,
    pub ballot_open_time: Option<DateTime<Utc>>,
    pub ballot_close_time: Option<DateTime<Utc>>,
}

impl From<Position> for PositionDescription {
    fn from(position: Position) -> Self {
        Self {
            id: position.id,
            name: position.position.name,
            order: position.position.order,
            max_votes: position.position.max_votes,
            allowed_year_levels: position.position.allowed_year_levels,
            ballot_open_time: position.position.ballot_open_time,
            ballot_close_time: position.position.ballot_close_time,
        }
    }
}
