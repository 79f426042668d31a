use mongodb::{bson::doc, bson::DateTime as BsonDateTime, Client};
use rocket::{serde::json::Json, Route, State};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    api::position::PositionDescription,
    auth::{Admin, AuthToken},
    common::ballot::{Open, Submitted},
    db::{ballot::Ballot, candidate::Candidate, election::Election, position::Position, vote::Vote},
    mongodb::{now_millis, Coll, Id},
};

pub fn routes() -> Vec<Route> {
    routes![open_position, close_position, delete_election]
}

/// Open a position for voting.
///
/// A window that the committee already configured for the future is left
/// alone; the default now → now+window only applies when no usable window
/// exists. Idempotent.
#[post("/admin/positions/<position_id>/open")]
pub(crate) async fn open_position(
    _token: AuthToken<Admin>,
    position_id: Id,
    positions: Coll<Position>,
    config: &State<Config>,
) -> Result<Json<PositionDescription>> {
    let now = now_millis();
    let mut position = positions
        .find_one(position_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Position {}", position_id)))?;

    if position.has_usable_window(now) {
        // Already open, or scheduled to open; nothing to do.
        return Ok(Json(position.into()));
    }

    let close = now + config.position_window();
    positions
        .update_one(
            position_id.as_doc(),
            doc! { "$set": {
                "ballot_open_time": BsonDateTime::from_chrono(now),
                "ballot_close_time": BsonDateTime::from_chrono(close),
            }},
            None,
        )
        .await?;
    info!(
        "Opened position {position_id} until {close}",
    );
    position.ballot_open_time = Some(now);
    position.ballot_close_time = Some(close);
    Ok(Json(position.into()))
}

/// Close a position immediately.
///
/// Also force-closes every open ballot bound to the position, so that
/// late submissions are rejected by the ballot window check. Ballots that
/// already expired keep their earlier close time.
#[post("/admin/positions/<position_id>/close")]
pub(crate) async fn close_position(
    _token: AuthToken<Admin>,
    position_id: Id,
    positions: Coll<Position>,
    open_ballots: Coll<Ballot<Open>>,
) -> Result<Json<PositionDescription>> {
    let now = now_millis();
    let mut position = positions
        .find_one(position_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Position {}", position_id)))?;

    positions
        .update_one(
            position_id.as_doc(),
            doc! { "$set": {
                "ballot_close_time": BsonDateTime::from_chrono(now),
            }},
            None,
        )
        .await?;

    let forced = open_ballots
        .update_many(
            doc! {
                "position_id": position_id,
                "state": Open,
                "close_time": { "$gt": BsonDateTime::from_chrono(now) },
            },
            doc! { "$set": { "close_time": BsonDateTime::from_chrono(now) } },
            None,
        )
        .await?;
    info!(
        "Closed position {position_id}, force-closed {} open ballots",
        forced.modified_count
    );

    position.ballot_close_time = Some(now);
    Ok(Json(position.into()))
}

/// Delete an election's voting data: the election itself plus its
/// positions, candidates, ballots, and votes, atomically.
///
/// Only permitted while the election has zero submitted ballots (and
/// therefore zero votes); a running or finished election's record is
/// permanent.
#[delete("/admin/elections/<election_id>")]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn delete_election(
    _token: AuthToken<Admin>,
    election_id: Id,
    elections: Coll<Election>,
    positions: Coll<Position>,
    candidates: Coll<Candidate>,
    submitted_ballots: Coll<Ballot<Submitted>>,
    open_ballots: Coll<Ballot<Open>>,
    votes: Coll<Vote>,
    db_client: &State<Client>,
) -> Result<()> {
    let election = elections
        .find_one(election_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Election {}", election_id)))?;

    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    let submitted = submitted_ballots
        .count_documents_with_session(
            doc! { "election_id": election.id, "state": Submitted },
            None,
            &mut session,
        )
        .await?;
    if submitted > 0 {
        let _ = session.abort_transaction().await;
        return Err(Error::bad_request(format!(
            "Cannot delete election {election_id}: it has {submitted} submitted ballots",
        )));
    }

    let result = elections
        .delete_one_with_session(election_id.as_doc(), None, &mut session)
        .await?;
    debug_assert_eq!(result.deleted_count, 1);

    let filter = doc! { "election_id": election_id };
    positions
        .delete_many_with_session(filter.clone(), None, &mut session)
        .await?;
    candidates
        .delete_many_with_session(filter.clone(), None, &mut session)
        .await?;
    open_ballots
        .delete_many_with_session(filter.clone(), None, &mut session)
        .await?;
    // Vacuous while the zero-submitted guard holds, but keeps the cascade
    // complete if that rule ever changes.
    votes
        .delete_many_with_session(filter, None, &mut session)
        .await?;

    session.commit_transaction().await?;
    warn!("Deleted election {election_id} and all its voting data");
    Ok(())
}
