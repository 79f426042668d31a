use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::{ElectionKind, ElectionState, WindowReason, WindowStatus},
    mongodb::Id,
};

/// Core election data, as stored in the database.
///
/// Election CRUD belongs to the administration subsystem; the engine
/// reads these documents to gate voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCore {
    /// Display name, e.g. "SSG General Election 2026".
    pub name: String,
    /// Whether this is the institution-wide SSG election or a
    /// departmental one.
    pub kind: ElectionKind,
    /// Lifecycle state; only `Active` elections accept votes.
    pub state: ElectionState,
    /// The day the election runs on.
    pub date: NaiveDate,
    /// SSG only: time of day voting opens.
    pub open_time: Option<NaiveTime>,
    /// SSG only: time of day voting closes. A close time at or before the
    /// open time means the window crosses midnight into the next day.
    pub close_time: Option<NaiveTime>,
    /// SSG only: seconds each ballot's countdown timer runs for.
    /// Falls back to the configured default when absent.
    pub ballot_duration: Option<i64>,
    /// Departmental only: the department this election belongs to.
    pub department_id: Option<Id>,
}

impl ElectionCore {
    /// The absolute SSG voting window, derived from the election date and
    /// the open/close times of day. `None` if the times are not configured.
    pub fn ssg_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let open_time = self.open_time?;
        let close_time = self.close_time?;
        let open = Utc.from_utc_datetime(&self.date.and_time(open_time));
        let mut close = Utc.from_utc_datetime(&self.date.and_time(close_time));
        if close <= open {
            close = close + Duration::days(1);
        }
        Some((open, close))
    }

    /// Is voting currently open for this election?
    ///
    /// SSG: open iff the election is active and `now` falls inside the
    /// configured window. Departmental: the per-position windows are
    /// authoritative, so an active election reports open here and the
    /// position sequencer does the rest. Pure and side-effect-free.
    pub fn window_status(&self, now: DateTime<Utc>) -> WindowStatus {
        if self.state != ElectionState::Active {
            return WindowStatus::closed(WindowReason::ElectionInactive);
        }
        match self.kind {
            ElectionKind::Ssg => match self.ssg_window() {
                Some((open, close)) => {
                    if now < open {
                        WindowStatus::closed(WindowReason::NotYetOpen)
                    } else if now >= close {
                        WindowStatus::closed(WindowReason::Closed)
                    } else {
                        WindowStatus::open(close - now)
                    }
                }
                None => WindowStatus::closed(WindowReason::NotYetOpen),
            },
            ElectionKind::Departmental => WindowStatus::open_unbounded(),
        }
    }

    /// The countdown duration for SSG ballots of this election.
    pub fn ballot_duration(&self, default: Duration) -> Duration {
        self.ballot_duration.map(Duration::seconds).unwrap_or(default)
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl ElectionCore {
        /// An active SSG election whose window opened an hour ago and
        /// closes an hour from now.
        pub fn ssg_example() -> Self {
            let open = Utc::now() - Duration::hours(1);
            Self {
                name: "SSG General Election".to_string(),
                kind: ElectionKind::Ssg,
                state: ElectionState::Active,
                date: open.date_naive(),
                open_time: Some(open.time()),
                close_time: Some((open + Duration::hours(2)).time()),
                ballot_duration: None,
                department_id: None,
            }
        }

        /// An SSG election whose window has not opened yet.
        pub fn upcoming_ssg_example() -> Self {
            let open = Utc::now() + Duration::hours(2);
            Self {
                state: ElectionState::Upcoming,
                date: open.date_naive(),
                open_time: Some(open.time()),
                close_time: Some((open + Duration::hours(2)).time()),
                ..Self::ssg_example()
            }
        }

        /// An active departmental election for the given department.
        pub fn departmental_example(department_id: Id) -> Self {
            Self {
                name: "CS Department Election".to_string(),
                kind: ElectionKind::Departmental,
                open_time: None,
                close_time: None,
                department_id: Some(department_id),
                ..Self::ssg_example()
            }
        }
    }

    impl Election {
        pub fn ssg_example() -> Self {
            Self {
                id: Id::new(),
                election: ElectionCore::ssg_example(),
            }
        }

        pub fn departmental_example(department_id: Id) -> Self {
            Self {
                id: Id::new(),
                election: ElectionCore::departmental_example(department_id),
            }
        }
    }
}
