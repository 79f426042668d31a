use std::fmt::Debug;

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_unit_struct::{Deserialize_unit_struct, Serialize_unit_struct};

/// Trait for the ballot state, enforcing on the type level that a
/// submission timestamp is present if and only if the ballot is submitted.
pub trait BallotState: Copy {
    /// The submission record stored alongside the rest of the ballot.
    type Submission: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + Unpin;
}

/// Marker type for open (started but not yet submitted) ballots.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Open;

impl From<Open> for Bson {
    fn from(state: Open) -> Self {
        to_bson(&state).expect("serialisation is infallible")
    }
}

/// Open ballots carry no submission record.
impl BallotState for Open {
    type Submission = NoSubmission;
}

/// Marker type for submitted ballots.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Submitted;

impl From<Submitted> for Bson {
    fn from(state: Submitted) -> Self {
        to_bson(&state).expect("serialisation is infallible")
    }
}

/// Submitted ballots record when they were finalized.
impl BallotState for Submitted {
    type Submission = Submission;
}

/// The absence of a submission record; serializes to no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoSubmission {}

/// The submission record of a finalized ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
}
