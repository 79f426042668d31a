use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::YearLevel,
    db::voter::Voter,
    mongodb::{serde_option_datetime, Id},
};

/// Core position data, as stored in the database.
///
/// Position CRUD belongs to the administration subsystem; the engine
/// reads positions to validate selections and, for departmental
/// elections, to sequence voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCore {
    /// Foreign key election ID.
    pub election_id: Id,
    /// Display name, e.g. "President".
    pub name: String,
    /// Sequencing and tie-break key; lower comes first.
    pub order: u32,
    /// How many selections one ballot may contain for this position.
    pub max_votes: u32,
    /// Year levels admitted to vote for this position.
    /// Absent means all levels are allowed.
    pub allowed_year_levels: Option<HashSet<YearLevel>>,
    /// Departmental only: when this position starts accepting votes.
    #[serde(with = "serde_option_datetime")]
    pub ballot_open_time: Option<DateTime<Utc>>,
    /// Departmental only: when this position stops accepting votes.
    #[serde(with = "serde_option_datetime")]
    pub ballot_close_time: Option<DateTime<Utc>>,
}

impl PositionCore {
    /// Does this position's own window contain `now`?
    pub fn is_window_open(&self, now: DateTime<Utc>) -> bool {
        match (self.ballot_open_time, self.ballot_close_time) {
            (Some(open), Some(close)) => open <= now && now < close,
            _ => false,
        }
    }

    /// Does this position have a window that is still usable, i.e. one
    /// that has not already closed? Open requests must not clobber such
    /// a window with "now".
    pub fn has_usable_window(&self, now: DateTime<Utc>) -> bool {
        matches!(self.ballot_close_time, Some(close) if close > now)
    }

    /// Does the year-level restriction admit the given level?
    pub fn admits(&self, year_level: YearLevel) -> bool {
        match &self.allowed_year_levels {
            Some(levels) => levels.contains(&year_level),
            None => true,
        }
    }
}

/// A position from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub position: PositionCore,
}

impl Position {
    /// The position currently accepting this voter's vote: the
    /// earliest-ordered one whose window contains `now`, whose year-level
    /// restriction admits the voter, and which the voter has not yet
    /// voted for. Several positions may be open at once; each voter is
    /// still gated to the earliest they haven't finished.
    ///
    /// A pure query over a snapshot of the positions; recomputed per
    /// request so it stays correct across server instances.
    pub fn current_active(
        positions: impl IntoIterator<Item = Position>,
        voter: &Voter,
        voted: &HashSet<Id>,
        now: DateTime<Utc>,
    ) -> Option<Position> {
        let mut candidates: Vec<_> = positions
            .into_iter()
            .filter(|p| {
                p.is_window_open(now) && p.admits(voter.year_level) && !voted.contains(&p.id)
            })
            .collect();
        candidates.sort_by_key(|p| (p.order, p.id));
        candidates.into_iter().next()
    }
}

impl Deref for Position {
    type Target = PositionCore;

    fn deref(&self) -> &Self::Target {
        &self.position
    }
}

impl DerefMut for Position {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.position
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::db::voter::VoterCore;

    fn position(election_id: Id, order: u32) -> Position {
        Position {
            id: Id::new(),
            position: PositionCore {
                order,
                ..PositionCore::example(election_id)
            },
        }
    }

    #[test]
    fn earliest_open_position_wins() {
        let election_id = Id::new();
        let voter = Voter {
            id: Id::new(),
            voter: VoterCore::officer_example(Id::new()),
        };
        let first = position(election_id, 1);
        let second = position(election_id, 2);

        let current = Position::current_active(
            [second.clone(), first.clone()],
            &voter,
            &HashSet::new(),
            Utc::now(),
        );
        assert_eq!(current.unwrap().id, first.id);

        // Once the voter has finished the first, the second is current.
        let voted = [first.id].into_iter().collect();
        let current = Position::current_active([second.clone(), first], &voter, &voted, Utc::now());
        assert_eq!(current.unwrap().id, second.id);
    }

    #[test]
    fn closed_windows_are_skipped() {
        let election_id = Id::new();
        let voter = Voter {
            id: Id::new(),
            voter: VoterCore::officer_example(Id::new()),
        };
        let mut early = position(election_id, 1);
        early.position.ballot_close_time = Some(Utc::now() - Duration::minutes(5));
        let late = position(election_id, 2);

        let current =
            Position::current_active([early, late.clone()], &voter, &HashSet::new(), Utc::now());
        assert_eq!(current.unwrap().id, late.id);
    }

    #[test]
    fn unconfigured_window_is_closed() {
        let election_id = Id::new();
        let voter = Voter {
            id: Id::new(),
            voter: VoterCore::officer_example(Id::new()),
        };
        let mut unopened = position(election_id, 1);
        unopened.position.ballot_open_time = None;
        unopened.position.ballot_close_time = None;

        let current = Position::current_active([unopened], &voter, &HashSet::new(), Utc::now());
        assert!(current.is_none());
    }

    #[test]
    fn year_level_restriction_gates_the_queue() {
        let election_id = Id::new();
        // The example officer is a third-year.
        let voter = Voter {
            id: Id::new(),
            voter: VoterCore::officer_example(Id::new()),
        };
        let mut restricted = position(election_id, 1);
        restricted.position.allowed_year_levels =
            Some([YearLevel::First].into_iter().collect());
        let open_to_all = position(election_id, 2);

        let current = Position::current_active(
            [restricted, open_to_all.clone()],
            &voter,
            &HashSet::new(),
            Utc::now(),
        );
        assert_eq!(current.unwrap().id, open_to_all.id);
    }
}
