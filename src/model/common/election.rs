use std::fmt::{self, Display, Formatter};

use chrono::Duration;
use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// The two kinds of election the platform runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionKind {
    /// Institution-wide student government election, with one global
    /// voting window and a per-ballot countdown timer.
    Ssg,
    /// Per-department election, where each position carries its own
    /// voting window.
    Departmental,
}

impl From<ElectionKind> for Bson {
    fn from(kind: ElectionKind) -> Self {
        to_bson(&kind).expect("serialisation is infallible")
    }
}

/// States in the Election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Configured but not yet accepting votes.
    Upcoming,
    /// Accepting votes, subject to the window checks.
    Active,
    /// Voting finished.
    Completed,
    /// Called off; never accepts votes again.
    Cancelled,
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        to_bson(&state).expect("serialisation is infallible")
    }
}

/// Student year levels, stored as their ordinal.
#[derive(
    Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum YearLevel {
    First = 1,
    Second = 2,
    Third = 3,
    Fourth = 4,
}

impl Display for YearLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::First => "1st year",
            Self::Second => "2nd year",
            Self::Third => "3rd year",
            Self::Fourth => "4th year",
        };
        write!(f, "{label}")
    }
}

/// Why a voting window is not currently open.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowReason {
    NotYetOpen,
    Closed,
    ElectionInactive,
}

impl Display for WindowReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotYetOpen => "voting has not yet opened",
            Self::Closed => "voting has closed",
            Self::ElectionInactive => "the election is not active",
        };
        write!(f, "{msg}")
    }
}

/// The result of asking whether voting is currently open.
/// Pure data; producing one has no side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub open: bool,
    pub reason: Option<WindowReason>,
    pub time_remaining: Option<Duration>,
}

impl WindowStatus {
    pub fn open(time_remaining: Duration) -> Self {
        Self {
            open: true,
            reason: None,
            time_remaining: Some(time_remaining),
        }
    }

    /// Open with no election-level deadline; used by departmental
    /// elections, whose deadlines live on each position.
    pub fn open_unbounded() -> Self {
        Self {
            open: true,
            reason: None,
            time_remaining: None,
        }
    }

    pub fn closed(reason: WindowReason) -> Self {
        Self {
            open: false,
            reason: Some(reason),
            time_remaining: None,
        }
    }
}
