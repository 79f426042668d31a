use mongodb::bson::doc;
use rocket::{serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::tally::{BallotCount, CandidateTally},
    auth::{Admin, AuthToken},
    common::ballot::{Open, Submitted},
    db::{ballot::AnyBallot, candidate::Candidate, vote::Vote},
    mongodb::{Coll, Id},
};

pub fn routes() -> Vec<Route> {
    routes![candidate_tally, ballot_count]
}

/// Per-candidate tally for the reporting subsystem: the recount from the
/// votes collection next to the denormalized cache. The recount is
/// authoritative; a mismatch means the cache needs repair.
#[get("/tally/candidates/<candidate_id>")]
pub(crate) async fn candidate_tally(
    _token: AuthToken<Admin>,
    candidate_id: Id,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
) -> Result<Json<CandidateTally>> {
    let candidate = candidates
        .find_one(candidate_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Candidate {}", candidate_id)))?;

    let counted = votes
        .count_documents(doc! { "candidate_id": candidate_id }, None)
        .await?;

    Ok(Json(CandidateTally {
        candidate_id,
        cached: candidate.vote_count,
        counted,
    }))
}

/// Ballot count for an election, optionally filtered by submission state.
#[get("/tally/elections/<election_id>/ballots?<submitted>")]
pub(crate) async fn ballot_count(
    _token: AuthToken<Admin>,
    election_id: Id,
    submitted: Option<bool>,
    ballots: Coll<AnyBallot>,
) -> Result<Json<BallotCount>> {
    let mut filter = doc! { "election_id": election_id };
    match submitted {
        Some(true) => {
            filter.insert("state", Submitted);
        }
        Some(false) => {
            filter.insert("state", Open);
        }
        None => {}
    }
    let count = ballots.count_documents(filter, None).await?;
    Ok(Json(BallotCount { count }))
}
