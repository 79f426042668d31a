use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::ballot::{Open, Submitted},
    db::ballot::Ballot,
    mongodb::Id,
};

/// Request body for starting an SSG ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSsgBallot {
    pub election_id: Id,
}

/// Request body for starting a departmental ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDepartmentalBallot {
    pub election_id: Id,
    pub position_id: Id,
}

/// The voting session handed back from `start`: everything the client
/// needs to render the ballot and retry idempotently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSession {
    pub ballot_id: Id,
    pub token: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    /// SSG only: countdown length in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

impl BallotSession {
    /// The session for an SSG ballot, which carries its countdown length.
    pub fn for_ssg(ballot: &Ballot<Open>) -> Self {
        let duration = ballot.close_time - ballot.open_time;
        Self {
            ballot_id: ballot.id,
            token: ballot.token.clone(),
            open_time: ballot.open_time,
            close_time: ballot.close_time,
            duration_secs: Some(duration.num_seconds()),
        }
    }

    /// The session for a departmental ballot; the position window is
    /// authoritative, so there is no countdown.
    pub fn for_departmental(ballot: &Ballot<Open>) -> Self {
        Self {
            ballot_id: ballot.id,
            token: ballot.token.clone(),
            open_time: ballot.open_time,
            close_time: ballot.close_time,
            duration_secs: None,
        }
    }
}

/// One selection in a submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSelection {
    pub position_id: Id,
    pub candidate_id: Id,
}

/// Request body for submitting a ballot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBallot {
    pub votes: Vec<BallotSelection>,
}

/// Receipt for a successful SSG submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub submitted_at: DateTime<Utc>,
    pub vote_count: usize,
}

impl SubmitReceipt {
    pub fn new(ballot: &Ballot<Submitted>, vote_count: usize) -> Self {
        Self {
            submitted_at: ballot.submission.submitted_at,
            vote_count,
        }
    }
}

/// Receipt for a successful departmental submission, naming the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentalSubmitReceipt {
    pub submitted_at: DateTime<Utc>,
    pub position: String,
    pub vote_count: usize,
}

/// Request body for extending an SSG ballot timer.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ExtendTimer {
    pub minutes: i64,
}

/// Response to the timer operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStatus {
    pub close_time: DateTime<Utc>,
    pub timer_started_at: Option<DateTime<Utc>>,
}
