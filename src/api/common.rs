use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use rocket::futures::TryStreamExt;

use crate::error::{Error, Result};
use crate::model::{
    auth::AuthToken,
    common::ballot::{Open, Submitted},
    db::{
        audit::{AuditEventKind, NewAuditEvent},
        ballot::{AnyBallot, Ballot, BallotCore},
        election::Election,
        position::Position,
        voter::{Eligibility, Voter},
    },
    mongodb::{
        errors::{is_duplicate_key_error, is_transaction_conflict},
        Coll, Id,
    },
};

/// Return a Voter from the database via looking up their token ID.
pub async fn voter_by_token(token: &AuthToken<Voter>, voters: &Coll<Voter>) -> Result<Voter> {
    let voter_id = token.id();
    voters
        .find_one(voter_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Voter {}", voter_id)))
}

/// Return an Election from the database by ID.
pub async fn election_by_id(election_id: Id, elections: &Coll<Election>) -> Result<Election> {
    elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {}", election_id)))
}

/// Fail with 403 unless the eligibility verdict passed.
pub fn ensure_eligible(eligibility: &Eligibility) -> Result<()> {
    if eligibility.eligible {
        Ok(())
    } else {
        let reasons = eligibility
            .reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::forbidden(format!("Not eligible to vote: {reasons}")))
    }
}

/// The IDs of positions this voter has already submitted a ballot for in
/// the given election.
pub async fn voted_position_ids(
    voter_id: Id,
    election_id: Id,
    submitted_ballots: &Coll<Ballot<Submitted>>,
) -> Result<HashSet<Id>> {
    let filter = doc! {
        "voter_id": voter_id,
        "election_id": election_id,
        "state": Submitted,
    };
    let ballots: Vec<Ballot<Submitted>> =
        submitted_ballots.find(filter, None).await?.try_collect().await?;
    Ok(ballots.into_iter().filter_map(|b| b.position_id).collect())
}

/// The position currently accepting this voter's vote in a departmental
/// election, per the sequencing rules.
pub async fn current_position(
    voter: &Voter,
    election: &Election,
    positions: &Coll<Position>,
    submitted_ballots: &Coll<Ballot<Submitted>>,
    now: DateTime<Utc>,
) -> Result<Option<Position>> {
    let all: Vec<Position> = positions
        .find(doc! { "election_id": election.id }, None)
        .await?
        .try_collect()
        .await?;
    let voted = voted_position_ids(voter.id, election.id, submitted_ballots).await?;
    Ok(Position::current_active(all, voter, &voted, now))
}

/// Look for an existing ballot under the one-active-ballot key.
///
/// A submitted ballot means the voter is done: `AlreadyVoted`. A live open
/// ballot is returned unchanged (resume semantics, supports reconnects).
/// An expired open ballot is deleted, with the audit event, leaving the
/// key free for a fresh ballot.
pub async fn resume_or_clear(
    any_ballots: &Coll<AnyBallot>,
    open_ballots: &Coll<Ballot<Open>>,
    audit_log: &Coll<NewAuditEvent>,
    voter_id: Id,
    election_id: Id,
    position_id: Option<Id>,
    now: DateTime<Utc>,
) -> Result<Option<Ballot<Open>>> {
    let filter = BallotCore::<Open>::key_filter(voter_id, election_id, position_id);
    match any_ballots.find_one(filter, None).await? {
        Some(AnyBallot::Submitted(_)) => Err(already_voted()),
        Some(AnyBallot::Open(ballot)) if !ballot.is_expired(now) => Ok(Some(ballot)),
        Some(AnyBallot::Open(expired)) => {
            let result = open_ballots
                .delete_one(doc! { "_id": expired.id, "state": Open }, None)
                .await?;
            if result.deleted_count == 1 {
                NewAuditEvent::new(AuditEventKind::BallotExpiredDeleted, voter_id, election_id)
                    .for_ballot(expired.id)
                    .for_position(position_id)
                    .record(audit_log)
                    .await;
            }
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Insert a freshly-created ballot, treating a duplicate-key violation on
/// the unique (voter, election, position) index as "someone got there
/// first": fetch and return whatever they created instead of erroring.
pub async fn insert_or_adopt(
    open_ballots: &Coll<Ballot<Open>>,
    any_ballots: &Coll<AnyBallot>,
    ballot: Ballot<Open>,
) -> Result<Ballot<Open>> {
    let result = open_ballots.insert_one(&ballot, None).await;
    if is_duplicate_key_error(result.as_ref()) {
        let filter = BallotCore::<Open>::key_filter(
            ballot.voter_id,
            ballot.election_id,
            ballot.position_id,
        );
        return match any_ballots.find_one(filter, None).await? {
            Some(AnyBallot::Open(existing)) => Ok(existing),
            Some(AnyBallot::Submitted(_)) => Err(already_voted()),
            // The winner expired and was swept between their insert and
            // our fetch; let the caller retry with the token.
            None => Err(Error::conflict("Ballot creation raced; please retry")),
        };
    }
    result?;
    Ok(ballot)
}

/// The uniform `AlreadyVoted` rejection.
pub fn already_voted() -> Error {
    Error::bad_request("You have already voted here")
}

/// Normalize a transaction write conflict into the retryable 409; any
/// other error passes through untouched. Conflicts can surface at the
/// write statements or at commit, so both paths funnel through here.
pub fn as_submission_conflict(err: Error) -> Error {
    match err {
        Error::Db(db_err) if is_transaction_conflict(&db_err) => {
            Error::conflict("Submission lost a race; re-check the ballot state")
        }
        other => other,
    }
}
