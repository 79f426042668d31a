use chrono::{Duration, Utc};
use mongodb::{bson::doc, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::{future::BoxFuture, FutureExt, TryStreamExt},
    Build, Rocket,
};

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    common::ballot::Open,
    db::audit::{AuditEventKind, NewAuditEvent},
    mongodb::Coll,
};
use crate::scheduled_task::ScheduledTask;

use super::Ballot;

/// Periodic cleanup of expired open ballots.
///
/// Correctness never depends on this: every access path checks expiry
/// lazily against the clock. The sweep only reclaims abandoned sessions
/// and emits the corresponding audit events.
pub struct ExpirySweeper;

impl ExpirySweeper {
    /// Delete every expired open ballot, returning how many went.
    /// Expired ballots have no votes by construction, so deletion does
    /// not cascade.
    pub async fn run_once(db: &Database) -> Result<u64> {
        let now = Utc::now();
        let open_ballots = Coll::<Ballot<Open>>::from_db(db);
        let audit_log = Coll::<NewAuditEvent>::from_db(db);

        let filter = doc! {
            "state": Open,
            "close_time": { "$lt": mongodb::bson::DateTime::from_chrono(now) },
        };
        let expired: Vec<Ballot<Open>> = open_ballots.find(filter, None).await?.try_collect().await?;

        let mut deleted = 0;
        for ballot in expired {
            // Re-assert the state in the delete filter: a submission that
            // lands between the find and the delete must win.
            let result = open_ballots
                .delete_one(doc! { "_id": ballot.id, "state": Open }, None)
                .await?;
            if result.deleted_count == 1 {
                deleted += 1;
                NewAuditEvent::new(
                    AuditEventKind::BallotExpiredDeleted,
                    ballot.voter_id,
                    ballot.election_id,
                )
                .for_ballot(ballot.id)
                .for_position(ballot.position_id)
                .record(&audit_log)
                .await;
            }
        }

        if deleted > 0 {
            info!("Expiry sweep removed {deleted} abandoned ballots");
        } else {
            trace!("Expiry sweep had nothing to do");
        }
        Ok(deleted)
    }

    /// Run a sweep, then reschedule the next one. Since this is a
    /// recursive async function, we must use `BoxFuture` to avoid an
    /// infinitely-recursive state machine.
    fn sweep_loop(db: Database, interval: Duration) -> BoxFuture<'static, ()> {
        async move {
            if let Err(e) = Self::run_once(&db).await {
                error!("Expiry sweep failed, will retry next interval: {e}");
            }
            let next_run = Utc::now() + interval;
            // Fire and forget: dropping the handle does not cancel the task.
            let _ = ScheduledTask::new(Self::sweep_loop(db, interval), next_run);
        }
        .boxed()
    }
}

/// A fairing that starts the expiry sweep loop during Rocket ignition.
/// Depends on the database and config fairings having run first.
pub struct ExpirySweeperFairing;

#[rocket::async_trait]
impl Fairing for ExpirySweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ballot Expiry Sweeper",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let db = match rocket.state::<Database>() {
            Some(db) => db.clone(),
            None => {
                error!("Database was not available when starting the expiry sweeper");
                return Err(rocket);
            }
        };
        let interval = match rocket.state::<Config>() {
            Some(config) => config.sweep_interval(),
            None => {
                error!("Config was not available when starting the expiry sweeper");
                return Err(rocket);
            }
        };
        info!(
            "Ballot expiry sweeper running every {} seconds",
            interval.num_seconds()
        );
        let _ = ScheduledTask::new(
            ExpirySweeper::sweep_loop(db, interval),
            Utc::now() + interval,
        );
        Ok(rocket)
    }
}

#[cfg(test)]
mod tests {
    use mongodb::Database;

    use crate::model::{
        common::ballot::NoSubmission,
        db::ballot::BallotCore,
        mongodb::{now_millis, Id},
    };

    use super::*;

    fn open_ballot(close_in: Duration) -> Ballot<Open> {
        let now = now_millis();
        Ballot {
            id: Id::new(),
            ballot: BallotCore {
                voter_id: Id::new(),
                election_id: Id::new(),
                position_id: None,
                token: "token".to_string(),
                open_time: now - Duration::minutes(10),
                close_time: now + close_in,
                timer_started_at: None,
                state: Open,
                submission: NoSubmission {},
            },
        }
    }

    #[backend_test]
    async fn sweep_deletes_only_expired_ballots(db: Database) {
        let open_ballots = Coll::<Ballot<Open>>::from_db(&db);
        let live = open_ballot(Duration::minutes(5));
        let expired = open_ballot(Duration::minutes(-5));
        open_ballots.insert_one(&live, None).await.unwrap();
        open_ballots.insert_one(&expired, None).await.unwrap();

        let deleted = ExpirySweeper::run_once(&db).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(open_ballots
            .find_one(expired.id.as_doc(), None)
            .await
            .unwrap()
            .is_none());
        assert!(open_ballots
            .find_one(live.id.as_doc(), None)
            .await
            .unwrap()
            .is_some());

        // The deletion leaves an audit trail.
        let events = db
            .collection::<mongodb::bson::Document>("audit_log")
            .count_documents(doc! { "kind": "BALLOT_EXPIRED_DELETED" }, None)
            .await
            .unwrap();
        assert_eq!(events, 1);

        // A second sweep has nothing to do.
        let deleted = ExpirySweeper::run_once(&db).await.unwrap();
        assert_eq!(deleted, 0);
    }
}
