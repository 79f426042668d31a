use std::collections::HashSet;

use chrono::Utc;
use mongodb::{bson::doc, Client, ClientSession};
use rocket::{response::status::Created, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::ballot::{
        BallotSelection, BallotSession, ExtendTimer, StartSsgBallot, SubmitBallot, SubmitReceipt,
        TimerStatus,
    },
    auth::AuthToken,
    common::{ballot::Open, election::ElectionKind},
    db::{
        audit::{AuditEventKind, NewAuditEvent},
        ballot::{AnyBallot, Ballot, BallotCore},
        candidate::Candidate,
        election::Election,
        vote::Vote,
        voter::Voter,
    },
    mongodb::{now_millis, Coll, Id},
};

use super::common::{
    already_voted, as_submission_conflict, election_by_id, ensure_eligible, insert_or_adopt,
    resume_or_clear, voter_by_token,
};

pub fn routes() -> Vec<Route> {
    routes![start_ballot, submit_ballot, start_timer, extend_timer]
}

/// Start (or resume) an SSG voting session.
///
/// Eligibility and the election window are checked up front; the returned
/// session snapshot is then fixed until the timer operations or expiry.
#[post("/ssg/ballots/start", data = "<request>", format = "json")]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn start_ballot(
    token: AuthToken<Voter>,
    request: Json<StartSsgBallot>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    open_ballots: Coll<Ballot<Open>>,
    any_ballots: Coll<AnyBallot>,
    audit_log: Coll<NewAuditEvent>,
    config: &State<Config>,
) -> Result<Created<Json<BallotSession>>> {
    let now = now_millis();
    let voter = voter_by_token(&token, &voters).await?;
    let election = election_by_id(request.election_id, &elections).await?;
    if election.kind != ElectionKind::Ssg {
        return Err(Error::bad_request("Not an SSG election"));
    }

    ensure_eligible(&voter.ssg_eligibility())?;

    let window = election.window_status(now);
    if !window.open {
        return Err(Error::bad_request(format!(
            "Cannot start a ballot: {}",
            window.reason.expect("closed windows carry a reason")
        )));
    }

    // Resume an existing live session rather than create a second one.
    if let Some(existing) = resume_or_clear(
        &any_ballots,
        &open_ballots,
        &audit_log,
        voter.id,
        election.id,
        None,
        now,
    )
    .await?
    {
        let session = BallotSession::for_ssg(&existing);
        return Ok(created(session));
    }

    let duration = election.ballot_duration(config.ballot_duration());
    let ballot = Ballot::new_ssg(voter.id, election.id, now, duration, config);
    let ballot = insert_or_adopt(&open_ballots, &any_ballots, ballot).await?;

    NewAuditEvent::new(AuditEventKind::BallotStarted, voter.id, election.id)
        .for_ballot(ballot.id)
        .record(&audit_log)
        .await;

    Ok(created(BallotSession::for_ssg(&ballot)))
}

/// Submit an SSG ballot: validate the selections, then record the votes,
/// bump the candidate tallies, and finalize the ballot in one atomic
/// transaction. Partial ballots (fewer selections than positions) are
/// accepted.
#[post("/ssg/ballots/<ballot_id>/submit", data = "<request>", format = "json")]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn submit_ballot(
    token: AuthToken<Voter>,
    ballot_id: Id,
    request: Json<SubmitBallot>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    open_ballots: Coll<Ballot<Open>>,
    any_ballots: Coll<AnyBallot>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    audit_log: Coll<NewAuditEvent>,
    db_client: &State<Client>,
) -> Result<Json<SubmitReceipt>> {
    let selections = request.0.votes;
    // Reject malformed payloads before opening a transaction.
    if selections.is_empty() {
        return Err(Error::bad_request("A submission must contain votes"));
    }
    let mut seen = HashSet::new();
    for selection in &selections {
        if !seen.insert(selection.position_id) {
            return Err(Error::bad_request(format!(
                "Duplicate selection for position {}",
                selection.position_id
            )));
        }
    }

    // The roster may have changed since the ballot was started, so
    // eligibility is evaluated again here.
    let voter = voter_by_token(&token, &voters).await?;
    ensure_eligible(&voter.ssg_eligibility())?;

    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let outcome = record_submission(
        &mut session,
        &voter,
        ballot_id,
        &selections,
        &elections,
        &open_ballots,
        &any_ballots,
        &candidates,
        &votes,
    )
    .await;
    let receipt = match outcome {
        Ok(receipt) => receipt,
        Err(e) => {
            let _ = session.abort_transaction().await;
            return Err(as_submission_conflict(e));
        }
    };
    session
        .commit_transaction()
        .await
        .map_err(|e| as_submission_conflict(Error::from(e)))?;

    NewAuditEvent::new(AuditEventKind::Voted, voter.id, receipt.1)
        .for_ballot(ballot_id)
        .record(&audit_log)
        .await;

    Ok(Json(receipt.0))
}

/// The body of the vote recording transaction. Every read and write goes
/// through the session; any error aborts the whole thing, leaving the
/// ballot resumable with no votes and no counter changes.
#[allow(clippy::too_many_arguments)]
async fn record_submission(
    session: &mut ClientSession,
    voter: &Voter,
    ballot_id: Id,
    selections: &[BallotSelection],
    elections: &Coll<Election>,
    open_ballots: &Coll<Ballot<Open>>,
    any_ballots: &Coll<AnyBallot>,
    candidates: &Coll<Candidate>,
    votes: &Coll<Vote>,
) -> Result<(SubmitReceipt, Id)> {
    let now = now_millis();

    // The ballot must exist, be ours, and still be open.
    let ballot = match open_ballots
        .find_one_with_session(doc! { "_id": ballot_id, "state": Open }, None, session)
        .await?
    {
        Some(ballot) => ballot,
        None => {
            return match any_ballots
                .find_one_with_session(ballot_id.as_doc(), None, session)
                .await?
            {
                Some(AnyBallot::Submitted(_)) => Err(already_voted()),
                _ => Err(Error::not_found(format!("Ballot {}", ballot_id))),
            };
        }
    };
    if ballot.voter_id != voter.id {
        return Err(Error::forbidden("This ballot belongs to another voter"));
    }
    if ballot.position_id.is_some() {
        return Err(Error::bad_request("Not an SSG ballot"));
    }

    // Re-check both windows against the current clock, not page-render time.
    if ballot.is_expired(now) {
        return Err(Error::bad_request("This ballot's voting window has closed"));
    }
    let election = elections
        .find_one_with_session(ballot.election_id.as_doc(), None, session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {}", ballot.election_id)))?;
    let window = election.window_status(now);
    if !window.open {
        return Err(Error::bad_request(format!(
            "Cannot submit: {}",
            window.reason.expect("closed windows carry a reason")
        )));
    }

    // Every selection must name an active candidate actually standing for
    // that position in this election; one bad pair aborts the submission.
    for selection in selections {
        let filter = doc! {
            "_id": selection.candidate_id,
            "election_id": election.id,
            "position_id": selection.position_id,
            "active": true,
        };
        if candidates
            .find_one_with_session(filter, None, session)
            .await?
            .is_none()
        {
            return Err(Error::bad_request(format!(
                "No active candidate {} for position {}",
                selection.candidate_id, selection.position_id
            )));
        }
    }

    // Commit point: flip the ballot, conditional on it still being open.
    // A concurrent submission either conflicts here (write conflict) or
    // already flipped it (zero documents modified); either way, at most
    // one submission ever lands.
    let flip = open_ballots
        .update_one_with_session(
            doc! { "_id": ballot.id, "state": Open },
            BallotCore::<Open>::submission_update(now),
            None,
            session,
        )
        .await?;
    if flip.modified_count == 0 {
        return Err(already_voted());
    }

    // Record the votes and bump the cached tallies, all inside the same
    // transaction as the flip.
    let new_votes: Vec<Vote> = selections
        .iter()
        .map(|s| Vote::new(ballot.id, election.id, s.position_id, s.candidate_id, now))
        .collect();
    votes
        .insert_many_with_session(&new_votes, None, session)
        .await?;
    for selection in selections {
        candidates
            .update_one_with_session(
                selection.candidate_id.as_doc(),
                doc! { "$inc": { "vote_count": 1 } },
                None,
                session,
            )
            .await?;
    }

    let election_id = election.id;
    let submitted = ballot.submit(now);
    Ok((SubmitReceipt::new(&submitted, new_votes.len()), election_id))
}

/// Start the ballot countdown, re-anchoring the close time at now.
/// Idempotent: starting an already-started timer reports it unchanged.
#[post("/ssg/ballots/<ballot_id>/timer/start")]
pub(crate) async fn start_timer(
    token: AuthToken<Voter>,
    ballot_id: Id,
    elections: Coll<Election>,
    open_ballots: Coll<Ballot<Open>>,
    any_ballots: Coll<AnyBallot>,
    config: &State<Config>,
) -> Result<Json<TimerStatus>> {
    let now = now_millis();
    let ballot = ssg_ballot_for_timer(&token, ballot_id, &open_ballots, &any_ballots).await?;

    if ballot.timer_started_at.is_some() {
        return Ok(Json(TimerStatus {
            close_time: ballot.close_time,
            timer_started_at: ballot.timer_started_at,
        }));
    }

    let election = election_by_id(ballot.election_id, &elections).await?;
    let close_time = now + election.ballot_duration(config.ballot_duration());
    conditional_timer_update(&open_ballots, ballot.id, close_time, Some(now)).await?;

    Ok(Json(TimerStatus {
        close_time,
        timer_started_at: Some(now),
    }))
}

/// Extend the ballot countdown by the given minutes, anchored at
/// whichever of now/current close is later. Rejected once submitted.
#[post("/ssg/ballots/<ballot_id>/timer/extend", data = "<request>", format = "json")]
pub(crate) async fn extend_timer(
    token: AuthToken<Voter>,
    ballot_id: Id,
    request: Json<ExtendTimer>,
    open_ballots: Coll<Ballot<Open>>,
    any_ballots: Coll<AnyBallot>,
) -> Result<Json<TimerStatus>> {
    let now = now_millis();
    if request.minutes < 1 {
        return Err(Error::bad_request("Extension must be at least one minute"));
    }
    let ballot = ssg_ballot_for_timer(&token, ballot_id, &open_ballots, &any_ballots).await?;

    let close_time = ballot.extended_close_time(now, request.minutes);
    conditional_timer_update(&open_ballots, ballot.id, close_time, None).await?;

    Ok(Json(TimerStatus {
        close_time,
        timer_started_at: ballot.timer_started_at,
    }))
}

/// Fetch an open SSG ballot owned by the caller, for the timer routes.
async fn ssg_ballot_for_timer(
    token: &AuthToken<Voter>,
    ballot_id: Id,
    open_ballots: &Coll<Ballot<Open>>,
    any_ballots: &Coll<AnyBallot>,
) -> Result<Ballot<Open>> {
    let ballot = match open_ballots
        .find_one(doc! { "_id": ballot_id, "state": Open }, None)
        .await?
    {
        Some(ballot) => ballot,
        None => {
            return match any_ballots.find_one(ballot_id.as_doc(), None).await? {
                Some(AnyBallot::Submitted(_)) => {
                    Err(Error::bad_request("This ballot has already been submitted"))
                }
                _ => Err(Error::not_found(format!("Ballot {}", ballot_id))),
            };
        }
    };
    if ballot.voter_id != token.id() {
        return Err(Error::forbidden("This ballot belongs to another voter"));
    }
    if ballot.position_id.is_some() {
        return Err(Error::bad_request("Departmental ballots have no timer"));
    }
    Ok(ballot)
}

/// Apply a timer change, conditional on the ballot still being open.
/// A submission racing us makes the update match nothing, which we
/// surface as a conflict.
async fn conditional_timer_update(
    open_ballots: &Coll<Ballot<Open>>,
    ballot_id: Id,
    close_time: chrono::DateTime<Utc>,
    timer_started_at: Option<chrono::DateTime<Utc>>,
) -> Result<()> {
    let mut set = doc! {
        "close_time": mongodb::bson::DateTime::from_chrono(close_time),
    };
    if let Some(started) = timer_started_at {
        set.insert(
            "timer_started_at",
            mongodb::bson::DateTime::from_chrono(started),
        );
    }
    let result = open_ballots
        .update_one(
            doc! { "_id": ballot_id, "state": Open },
            doc! { "$set": set },
            None,
        )
        .await?;
    if result.modified_count == 0 {
        return Err(Error::conflict(
            "The ballot was submitted before the timer change applied",
        ));
    }
    Ok(())
}

fn created(session: BallotSession) -> Created<Json<BallotSession>> {
    Created::new(format!("/ssg/ballots/{}", session.ballot_id)).body(Json(session))
}
