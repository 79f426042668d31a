use std::collections::HashSet;

use mongodb::{bson::doc, Client, ClientSession};
use rocket::{response::status::Created, serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        ballot::{
            BallotSelection, BallotSession, DepartmentalSubmitReceipt, StartDepartmentalBallot,
            SubmitBallot,
        },
        position::PositionDescription,
    },
    auth::AuthToken,
    common::{
        ballot::{Open, Submitted},
        election::{ElectionKind, ElectionState},
    },
    db::{
        audit::{AuditEventKind, NewAuditEvent},
        ballot::{AnyBallot, Ballot, BallotCore},
        candidate::Candidate,
        election::Election,
        position::Position,
        vote::Vote,
        voter::Voter,
    },
    mongodb::{now_millis, Coll, Id},
};

use super::common::{
    already_voted, as_submission_conflict, current_position, election_by_id, ensure_eligible,
    insert_or_adopt, resume_or_clear, voter_by_token,
};

pub fn routes() -> Vec<Route> {
    routes![start_ballot, submit_ballot, current_active_position]
}

/// Start (or resume) a departmental voting session for one position.
///
/// Besides eligibility, the position must be the voter's current one in
/// the sequence: the earliest-ordered open position they haven't voted
/// for. The ballot snapshots the position's own window; there is no
/// per-ballot countdown.
#[post("/departmental/ballots/start", data = "<request>", format = "json")]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn start_ballot(
    token: AuthToken<Voter>,
    request: Json<StartDepartmentalBallot>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    positions: Coll<Position>,
    open_ballots: Coll<Ballot<Open>>,
    submitted_ballots: Coll<Ballot<Submitted>>,
    any_ballots: Coll<AnyBallot>,
    audit_log: Coll<NewAuditEvent>,
    config: &State<Config>,
) -> Result<Created<Json<BallotSession>>> {
    let now = now_millis();
    let voter = voter_by_token(&token, &voters).await?;
    let election = election_by_id(request.election_id, &elections).await?;
    if election.kind != ElectionKind::Departmental {
        return Err(Error::bad_request("Not a departmental election"));
    }
    let position = positions
        .find_one(
            doc! { "_id": request.position_id, "election_id": election.id },
            None,
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("Position {}", request.position_id)))?;

    ensure_eligible(&voter.departmental_eligibility(&election, &position))?;

    if election.state != ElectionState::Active {
        return Err(Error::bad_request("Cannot start a ballot: the election is not active"));
    }

    // Resume an existing live session for this position before anything else.
    if let Some(existing) = resume_or_clear(
        &any_ballots,
        &open_ballots,
        &audit_log,
        voter.id,
        election.id,
        Some(position.id),
        now,
    )
    .await?
    {
        let session = BallotSession::for_departmental(&existing);
        return Ok(created(session));
    }

    // Sequencer gate: creation is only allowed for the voter's current
    // position, recomputed against the live positions on every request.
    if !position.is_window_open(now) {
        return Err(Error::bad_request(
            "This position is not currently accepting votes",
        ));
    }
    let current = current_position(&voter, &election, &positions, &submitted_ballots, now).await?;
    match current {
        Some(ref current) if current.id == position.id => {}
        Some(current) => {
            return Err(Error::bad_request(format!(
                "Voting for {} must be completed first",
                current.name
            )));
        }
        None => {
            return Err(Error::bad_request(
                "No position is currently accepting your votes",
            ));
        }
    }

    let window = match (position.ballot_open_time, position.ballot_close_time) {
        (Some(open), Some(close)) => (open, close),
        _ => {
            return Err(Error::bad_request(
                "This position's voting window is not configured",
            ))
        }
    };
    let ballot = Ballot::new_departmental(voter.id, election.id, position.id, window, config);
    let ballot = insert_or_adopt(&open_ballots, &any_ballots, ballot).await?;

    NewAuditEvent::new(AuditEventKind::BallotStarted, voter.id, election.id)
        .for_ballot(ballot.id)
        .for_position(position.id)
        .record(&audit_log)
        .await;

    Ok(created(BallotSession::for_departmental(&ballot)))
}

/// Submit a departmental ballot: up to `max_votes` selections, all for
/// the ballot's single bound position, recorded atomically exactly like
/// the SSG path.
#[post(
    "/departmental/ballots/<ballot_id>/submit",
    data = "<request>",
    format = "json"
)]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn submit_ballot(
    token: AuthToken<Voter>,
    ballot_id: Id,
    request: Json<SubmitBallot>,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    positions: Coll<Position>,
    open_ballots: Coll<Ballot<Open>>,
    any_ballots: Coll<AnyBallot>,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    audit_log: Coll<NewAuditEvent>,
    db_client: &State<Client>,
) -> Result<Json<DepartmentalSubmitReceipt>> {
    let selections = request.0.votes;
    // Reject malformed payloads before opening a transaction.
    if selections.is_empty() {
        return Err(Error::bad_request("A submission must contain votes"));
    }
    let mut seen = HashSet::new();
    for selection in &selections {
        if !seen.insert(selection.candidate_id) {
            return Err(Error::bad_request(format!(
                "Duplicate selection for candidate {}",
                selection.candidate_id
            )));
        }
    }

    let voter = voter_by_token(&token, &voters).await?;

    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    let outcome = record_submission(
        &mut session,
        &voter,
        ballot_id,
        &selections,
        &elections,
        &positions,
        &open_ballots,
        &any_ballots,
        &candidates,
        &votes,
    )
    .await;
    let (receipt, election_id, position_id) = match outcome {
        Ok(ok) => ok,
        Err(e) => {
            let _ = session.abort_transaction().await;
            return Err(as_submission_conflict(e));
        }
    };
    session
        .commit_transaction()
        .await
        .map_err(|e| as_submission_conflict(Error::from(e)))?;

    NewAuditEvent::new(AuditEventKind::Voted, voter.id, election_id)
        .for_ballot(ballot_id)
        .for_position(position_id)
        .record(&audit_log)
        .await;

    Ok(Json(receipt))
}

/// The voter's current position in the sequence, if any.
#[get("/departmental/elections/<election_id>/positions/current")]
pub(crate) async fn current_active_position(
    token: AuthToken<Voter>,
    election_id: Id,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    positions: Coll<Position>,
    submitted_ballots: Coll<Ballot<Submitted>>,
) -> Result<Json<Option<PositionDescription>>> {
    let now = now_millis();
    let voter = voter_by_token(&token, &voters).await?;
    let election = election_by_id(election_id, &elections).await?;
    if election.kind != ElectionKind::Departmental {
        return Err(Error::bad_request("Not a departmental election"));
    }
    let current = current_position(&voter, &election, &positions, &submitted_ballots, now).await?;
    Ok(Json(current.map(PositionDescription::from)))
}

/// The body of the departmental vote recording transaction.
#[allow(clippy::too_many_arguments)]
async fn record_submission(
    session: &mut ClientSession,
    voter: &Voter,
    ballot_id: Id,
    selections: &[BallotSelection],
    elections: &Coll<Election>,
    positions: &Coll<Position>,
    open_ballots: &Coll<Ballot<Open>>,
    any_ballots: &Coll<AnyBallot>,
    candidates: &Coll<Candidate>,
    votes: &Coll<Vote>,
) -> Result<(DepartmentalSubmitReceipt, Id, Option<Id>)> {
    let now = now_millis();

    // The ballot must exist, be ours, still be open, and be bound to a
    // position.
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
    let position_id = match ballot.position_id {
        Some(id) => id,
        None => return Err(Error::bad_request("Not a departmental ballot")),
    };

    // The snapshotted position window is authoritative; a committee close
    // force-closes open ballots, so this also catches early closes.
    if ballot.is_expired(now) {
        return Err(Error::bad_request("This ballot's voting window has closed"));
    }
    let election = elections
        .find_one_with_session(ballot.election_id.as_doc(), None, session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {}", ballot.election_id)))?;
    if election.state != ElectionState::Active {
        return Err(Error::bad_request("Cannot submit: the election is not active"));
    }
    let position = positions
        .find_one_with_session(position_id.as_doc(), None, session)
        .await?
        .ok_or_else(|| Error::not_found(format!("Position {}", position_id)))?;

    // The roster may have changed since the ballot was started, so
    // eligibility is evaluated again against the live documents.
    ensure_eligible(&voter.departmental_eligibility(&election, &position))?;

    // All selections must target the bound position, within its seat count.
    for selection in selections {
        if selection.position_id != position_id {
            return Err(Error::bad_request(format!(
                "Selection for position {} on a ballot bound to {}",
                selection.position_id, position.name
            )));
        }
    }
    if selections.len() > position.max_votes as usize {
        return Err(Error::bad_request(format!(
            "At most {} selections are allowed for {}",
            position.max_votes, position.name
        )));
    }

    // Every selection must name an active candidate standing for this
    // position; one bad pair aborts the submission.
    for selection in selections {
        let filter = doc! {
            "_id": selection.candidate_id,
            "election_id": election.id,
            "position_id": position_id,
            "active": true,
        };
        if candidates
            .find_one_with_session(filter, None, session)
            .await?
            .is_none()
        {
            return Err(Error::bad_request(format!(
                "No active candidate {} for position {}",
                selection.candidate_id, position.name
            )));
        }
    }

    // Commit point, identical to the SSG path: conditional flip first,
    // then the votes and tally bumps, all in one transaction.
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

    let new_votes: Vec<Vote> = selections
        .iter()
        .map(|s| Vote::new(ballot.id, election.id, position_id, s.candidate_id, now))
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

    let receipt = DepartmentalSubmitReceipt {
        submitted_at: now,
        position: position.name.clone(),
        vote_count: new_votes.len(),
    };
    Ok((receipt, election.id, Some(position_id)))
}

fn created(session: BallotSession) -> Created<Json<BallotSession>> {
    Created::new(format!("/departmental/ballots/{}", session.ballot_id)).body(Json(session))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mongodb::Database;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::json,
    };

    use crate::api::fixtures::{insert_candidate, insert_election, insert_position};
    use crate::model::{
        common::election::YearLevel,
        db::{ballot::ExpirySweeper, election::ElectionCore, position::PositionCore, voter::VoterCore},
    };
    use crate::testing::{login_admin, login_as, login_voter};

    use super::*;

    async fn start(
        client: &Client,
        election_id: Id,
        position_id: Id,
    ) -> rocket::local::asynchronous::LocalResponse<'_> {
        client
            .post(uri!(start_ballot))
            .header(ContentType::JSON)
            .body(
                json!(StartDepartmentalBallot {
                    election_id,
                    position_id
                })
                .to_string(),
            )
            .dispatch()
            .await
    }

    async fn submit(
        client: &Client,
        ballot_id: Id,
        votes: Vec<BallotSelection>,
    ) -> rocket::local::asynchronous::LocalResponse<'_> {
        client
            .post(uri!(submit_ballot(ballot_id)))
            .header(ContentType::JSON)
            .body(json!(SubmitBallot { votes }).to_string())
            .dispatch()
            .await
    }

    async fn current(client: &Client, election_id: Id) -> Option<PositionDescription> {
        let response = client
            .get(uri!(current_active_position(election_id)))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        response.into_json().await.unwrap()
    }

    async fn ballot_total(db: &Database) -> u64 {
        Coll::<AnyBallot>::from_db(db)
            .count_documents(None, None)
            .await
            .unwrap()
    }

    #[backend_test]
    async fn non_officers_cannot_start(client: Client, db: Database) {
        let department = Id::new();
        login_voter(&client, &db, VoterCore::example(department)).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let position = insert_position(&db, PositionCore::example(election.id)).await;

        let response = start(&client, election.id, position.id).await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(ballot_total(&db).await, 0);
    }

    #[backend_test]
    async fn other_departments_cannot_start(client: Client, db: Database) {
        let department = Id::new();
        login_voter(&client, &db, VoterCore::officer_example(Id::new())).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let position = insert_position(&db, PositionCore::example(election.id)).await;

        let response = start(&client, election.id, position.id).await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(ballot_total(&db).await, 0);
    }

    #[backend_test]
    async fn year_level_restriction_blocks_start(client: Client, db: Database) {
        let department = Id::new();
        // The example officer is a third-year.
        login_voter(&client, &db, VoterCore::officer_example(department)).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let position = insert_position(
            &db,
            PositionCore {
                allowed_year_levels: Some([YearLevel::First].into_iter().collect()),
                ..PositionCore::example(election.id)
            },
        )
        .await;

        let response = start(&client, election.id, position.id).await;
        assert_eq!(response.status(), Status::Forbidden);
        assert_eq!(ballot_total(&db).await, 0);
    }

    #[backend_test]
    async fn voting_follows_the_position_sequence(client: Client, db: Database) {
        let department = Id::new();
        login_voter(&client, &db, VoterCore::officer_example(department)).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let president = insert_position(&db, PositionCore::example(election.id)).await;
        let senator = insert_position(&db, PositionCore::senator_example(election.id)).await;
        let p_candidate = insert_candidate(&db, election.id, president.id, "Ada").await;

        // Both windows are open, but the earliest unvoted position gates.
        let active = current(&client, election.id).await.unwrap();
        assert_eq!(active.id, president.id);

        let response = start(&client, election.id, senator.id).await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = start(&client, election.id, president.id).await;
        assert_eq!(response.status(), Status::Created);
        let session: BallotSession = response.into_json().await.unwrap();
        // The ballot snapshots the position's own window.
        assert_eq!(Some(session.open_time), president.ballot_open_time);
        assert_eq!(Some(session.close_time), president.ballot_close_time);
        assert_eq!(session.duration_secs, None);

        let response = submit(
            &client,
            session.ballot_id,
            vec![BallotSelection {
                position_id: president.id,
                candidate_id: p_candidate.id,
            }],
        )
        .await;
        assert_eq!(response.status(), Status::Ok);
        let receipt: DepartmentalSubmitReceipt = response.into_json().await.unwrap();
        assert_eq!(receipt.position, "President");
        assert_eq!(receipt.vote_count, 1);

        // The sequence advances to the senator race.
        let active = current(&client, election.id).await.unwrap();
        assert_eq!(active.id, senator.id);
        let response = start(&client, election.id, senator.id).await;
        assert_eq!(response.status(), Status::Created);
    }

    #[backend_test]
    async fn multi_seat_positions_take_up_to_max_votes(client: Client, db: Database) {
        let department = Id::new();
        login_voter(&client, &db, VoterCore::officer_example(department)).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let senator = insert_position(&db, PositionCore::senator_example(election.id)).await;
        let c1 = insert_candidate(&db, election.id, senator.id, "Ada").await;
        let c2 = insert_candidate(&db, election.id, senator.id, "Grace").await;
        let c3 = insert_candidate(&db, election.id, senator.id, "Edith").await;

        let session: BallotSession = start(&client, election.id, senator.id)
            .await
            .into_json()
            .await
            .unwrap();

        // Three selections exceed the two seats.
        let response = submit(
            &client,
            session.ballot_id,
            [c1.id, c2.id, c3.id]
                .into_iter()
                .map(|candidate_id| BallotSelection {
                    position_id: senator.id,
                    candidate_id,
                })
                .collect(),
        )
        .await;
        assert_eq!(response.status(), Status::BadRequest);

        // The same candidate twice is rejected outright.
        let response = submit(
            &client,
            session.ballot_id,
            vec![
                BallotSelection {
                    position_id: senator.id,
                    candidate_id: c1.id,
                },
                BallotSelection {
                    position_id: senator.id,
                    candidate_id: c1.id,
                },
            ],
        )
        .await;
        assert_eq!(response.status(), Status::BadRequest);

        // Two distinct seats are fine.
        let response = submit(
            &client,
            session.ballot_id,
            vec![
                BallotSelection {
                    position_id: senator.id,
                    candidate_id: c1.id,
                },
                BallotSelection {
                    position_id: senator.id,
                    candidate_id: c2.id,
                },
            ],
        )
        .await;
        assert_eq!(response.status(), Status::Ok);
        let receipt: DepartmentalSubmitReceipt = response.into_json().await.unwrap();
        assert_eq!(receipt.vote_count, 2);

        let votes = Coll::<Vote>::from_db(&db)
            .count_documents(doc! { "ballot_id": session.ballot_id }, None)
            .await
            .unwrap();
        assert_eq!(votes, 2);

        // Everything voted: no current position remains.
        assert_eq!(current(&client, election.id).await, None);
    }

    #[backend_test]
    async fn selections_must_target_the_bound_position(client: Client, db: Database) {
        let department = Id::new();
        login_voter(&client, &db, VoterCore::officer_example(department)).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let president = insert_position(&db, PositionCore::example(election.id)).await;
        let senator = insert_position(&db, PositionCore::senator_example(election.id)).await;
        let s_candidate = insert_candidate(&db, election.id, senator.id, "Grace").await;

        let session: BallotSession = start(&client, election.id, president.id)
            .await
            .into_json()
            .await
            .unwrap();

        let response = submit(
            &client,
            session.ballot_id,
            vec![BallotSelection {
                position_id: senator.id,
                candidate_id: s_candidate.id,
            }],
        )
        .await;
        assert_eq!(response.status(), Status::BadRequest);
        let votes = Coll::<Vote>::from_db(&db)
            .count_documents(None, None)
            .await
            .unwrap();
        assert_eq!(votes, 0);
    }

    #[backend_test]
    async fn closing_a_position_force_closes_its_ballots(client: Client, db: Database) {
        let department = Id::new();
        let voter = login_voter(&client, &db, VoterCore::officer_example(department)).await;
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;
        let president = insert_position(&db, PositionCore::example(election.id)).await;
        let p_candidate = insert_candidate(&db, election.id, president.id, "Ada").await;

        let session: BallotSession = start(&client, election.id, president.id)
            .await
            .into_json()
            .await
            .unwrap();

        // The committee pulls the plug.
        login_admin(&client).await;
        let response = client
            .post(uri!(crate::api::admin::close_position(president.id)))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        // A late submission bounces off the force-closed window.
        login_as(&client, voter.id, crate::model::auth::Rights::Voter).await;
        let response = submit(
            &client,
            session.ballot_id,
            vec![BallotSelection {
                position_id: president.id,
                candidate_id: p_candidate.id,
            }],
        )
        .await;
        assert_eq!(response.status(), Status::BadRequest);

        // The ballot is still unsubmitted, and expiry handling reclaims it.
        let ballot = Coll::<AnyBallot>::from_db(&db)
            .find_one(session.ballot_id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(ballot, AnyBallot::Open(_)));
        let deleted = ExpirySweeper::run_once(&db).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[backend_test]
    async fn open_respects_a_preconfigured_window(client: Client, db: Database) {
        login_admin(&client).await;
        let department = Id::new();
        let election = insert_election(&db, ElectionCore::departmental_example(department)).await;

        // A position with no usable window gets the default one.
        let fresh = insert_position(
            &db,
            PositionCore {
                ballot_open_time: None,
                ballot_close_time: None,
                ..PositionCore::example(election.id)
            },
        )
        .await;
        let response = client
            .post(uri!(crate::api::admin::open_position(fresh.id)))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let opened: PositionDescription = response.into_json().await.unwrap();
        let window = opened.ballot_close_time.unwrap() - opened.ballot_open_time.unwrap();
        assert_eq!(window.num_seconds(), 7200);

        // Opening again changes nothing.
        let again: PositionDescription = client
            .post(uri!(crate::api::admin::open_position(fresh.id)))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(again.ballot_close_time, opened.ballot_close_time);

        // A future-dated window is not overwritten with "now".
        let scheduled_open = now_millis() + Duration::hours(5);
        let scheduled = insert_position(
            &db,
            PositionCore {
                ballot_open_time: Some(scheduled_open),
                ballot_close_time: Some(scheduled_open + Duration::hours(2)),
                ..PositionCore::senator_example(election.id)
            },
        )
        .await;
        let kept: PositionDescription = client
            .post(uri!(crate::api::admin::open_position(scheduled.id)))
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(kept.ballot_open_time, Some(scheduled_open));
        assert_eq!(kept.ballot_close_time, Some(scheduled_open + Duration::hours(2)));
    }
}
