mod sweeper;

pub use sweeper::{ExpirySweeper, ExpirySweeperFairing};

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime, Document};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::model::{
    common::ballot::{BallotState, NoSubmission, Open, Submission, Submitted},
    mongodb::{serde_option_datetime, Id},
};

type HmacSha256 = Hmac<Sha256>;

/// Core ballot data, as stored in the database: one voting session for
/// one voter, bound to an election (SSG) or an election and position
/// (departmental).
///
/// The open/close timestamps are snapshotted at creation and only ever
/// changed by the explicit timer operations or a position force-close;
/// they are never silently recomputed from the election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallotCore<S: BallotState> {
    /// Foreign key voter ID.
    pub voter_id: Id,
    /// Foreign key election ID.
    pub election_id: Id,
    /// Foreign key position ID; departmental ballots bind to exactly one
    /// position, SSG ballots store null.
    pub position_id: Option<Id>,
    /// Opaque session token, returned to the caller at start and used to
    /// retry idempotently.
    pub token: String,
    /// When this ballot started accepting votes.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub open_time: DateTime<Utc>,
    /// When this ballot stops accepting votes.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub close_time: DateTime<Utc>,
    /// SSG only: when the voter started their countdown timer.
    #[serde(with = "serde_option_datetime")]
    pub timer_started_at: Option<DateTime<Utc>>,
    /// The current state of the ballot.
    pub state: S,
    /// Submission record; present iff submitted.
    #[serde(flatten)]
    pub submission: S::Submission,
}

impl BallotCore<Open> {
    /// Has this ballot's window passed without a submission?
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.close_time
    }

    /// Finalize this ballot.
    pub fn submit(self, submitted_at: DateTime<Utc>) -> BallotCore<Submitted> {
        BallotCore {
            voter_id: self.voter_id,
            election_id: self.election_id,
            position_id: self.position_id,
            token: self.token,
            open_time: self.open_time,
            close_time: self.close_time,
            timer_started_at: self.timer_started_at,
            state: Submitted,
            submission: Submission { submitted_at },
        }
    }
}

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ballot<S: BallotState> {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore<S>,
}

impl Ballot<Open> {
    /// Create a new SSG ballot whose window is an independent countdown
    /// starting now.
    pub fn new_ssg(
        voter_id: Id,
        election_id: Id,
        now: DateTime<Utc>,
        duration: Duration,
        config: &Config,
    ) -> Self {
        Self::new(voter_id, election_id, None, now, now + duration, config)
    }

    /// Create a new departmental ballot, snapshotting the position's own
    /// window. The position window stays authoritative; there is no
    /// per-ballot timer.
    pub fn new_departmental(
        voter_id: Id,
        election_id: Id,
        position_id: Id,
        window: (DateTime<Utc>, DateTime<Utc>),
        config: &Config,
    ) -> Self {
        Self::new(
            voter_id,
            election_id,
            Some(position_id),
            window.0,
            window.1,
            config,
        )
    }

    fn new(
        voter_id: Id,
        election_id: Id,
        position_id: Option<Id>,
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
        config: &Config,
    ) -> Self {
        let id = Id::new();
        let token = session_token(id, voter_id, config);
        let ballot = BallotCore {
            voter_id,
            election_id,
            position_id,
            token,
            open_time,
            close_time,
            timer_started_at: None,
            state: Open,
            submission: NoSubmission {},
        };
        Self { id, ballot }
    }

    /// The close time after an extension of the given minutes,
    /// anchored at whichever of now/current close is later.
    pub fn extended_close_time(&self, now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        self.close_time.max(now) + Duration::minutes(minutes)
    }

    /// Finalize this ballot.
    pub fn submit(self, submitted_at: DateTime<Utc>) -> Ballot<Submitted> {
        Ballot {
            id: self.id,
            ballot: self.ballot.submit(submitted_at),
        }
    }
}

impl<S: BallotState> BallotCore<S> {
    /// Filter matching the one-active-ballot key for a voter: SSG ballots
    /// store a null position, so the filter must include it explicitly.
    pub fn key_filter(voter_id: Id, election_id: Id, position_id: Option<Id>) -> Document {
        doc! {
            "voter_id": voter_id,
            "election_id": election_id,
            "position_id": position_id,
        }
    }

    /// The update that flips an open ballot to submitted. Applied with a
    /// `state: Open` filter, so the number of documents modified tells a
    /// racing submission that it lost.
    pub fn submission_update(submitted_at: DateTime<Utc>) -> Document {
        doc! {
            "$set": {
                "state": Submitted,
                "submitted_at": BsonDateTime::from_chrono(submitted_at),
            }
        }
    }
}

impl<S: BallotState> Deref for Ballot<S> {
    type Target = BallotCore<S>;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

impl<S: BallotState> DerefMut for Ballot<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ballot
    }
}

/// A ballot in either state. With the untagged representation,
/// `Ballot<Open>` and `Ballot<Submitted>` both directly deserialize to
/// this type.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnyBallot {
    Submitted(Ballot<Submitted>),
    Open(Ballot<Open>),
}

impl AnyBallot {
    pub fn id(&self) -> Id {
        match self {
            Self::Open(b) => b.id,
            Self::Submitted(b) => b.id,
        }
    }

    pub fn voter_id(&self) -> Id {
        match self {
            Self::Open(b) => b.voter_id,
            Self::Submitted(b) => b.voter_id,
        }
    }
}

/// An unforgeable session token: an HMAC over the ballot identity plus a
/// nonce, so tokens cannot be guessed from ballot IDs.
fn session_token(ballot_id: Id, voter_id: Id, config: &Config) -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut mac = HmacSha256::new_from_slice(config.ballot_token_secret())
        .expect("HMAC accepts any key length");
    mac.update(&ballot_id.to_bytes());
    mac.update(&voter_id.to_bytes());
    mac.update(&nonce);
    data_encoding::HEXLOWER.encode(&mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::common::ballot::Open;

    fn open_ballot(close_in: Duration) -> Ballot<Open> {
        let now = Utc::now();
        Ballot {
            id: Id::new(),
            ballot: BallotCore {
                voter_id: Id::new(),
                election_id: Id::new(),
                position_id: None,
                token: "token".to_string(),
                open_time: now,
                close_time: now + close_in,
                timer_started_at: None,
                state: Open,
                submission: NoSubmission {},
            },
        }
    }

    #[test]
    fn expiry_is_strictly_after_close() {
        let ballot = open_ballot(Duration::minutes(10));
        let now = Utc::now();
        assert!(!ballot.is_expired(now));
        assert!(!ballot.is_expired(ballot.close_time));
        assert!(ballot.is_expired(ballot.close_time + Duration::seconds(1)));
    }

    #[test]
    fn extension_anchors_at_the_later_of_now_and_close() {
        let now = Utc::now();

        // Still open: extend from the current close.
        let ballot = open_ballot(Duration::minutes(10));
        let extended = ballot.extended_close_time(now, 5);
        assert_eq!(extended, ballot.close_time + Duration::minutes(5));

        // Already past close: extend from now.
        let ballot = open_ballot(Duration::minutes(-10));
        let extended = ballot.extended_close_time(now, 5);
        assert_eq!(extended, now + Duration::minutes(5));
    }
}
