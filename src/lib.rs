#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scheduled_task;

use config::{ConfigFairing, DatabaseFairing};
use logging::LoggerFairing;
use model::db::ballot::ExpirySweeperFairing;

/// Build the rocket. The fairings do the heavy lifting: config first,
/// then the database (which the sweeper needs in managed state).
pub async fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(ExpirySweeperFairing)
        .attach(LoggerFairing)
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
pub(crate) fn database() -> String {
    "campusvote".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn database() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// Connect a bare MongoDB client from the figment `db_uri`.
/// Used by the test harness, which manages databases itself.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .expect("could not connect to database")
}

/// Build a rocket against a specific database, skipping the database
/// fairing (and the background sweeper, which tests drive manually).
#[cfg(test)]
pub(crate) async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db)
        .await
        .expect("failed to create indexes");
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(LoggerFairing)
        .manage(client)
        .manage(db)
}

/// Helpers for logging test clients in through the real session route.
#[cfg(test)]
pub(crate) mod testing {
    use mongodb::Database;
    use rocket::{http::ContentType, local::asynchronous::Client};

    use crate::config::Config;
    use crate::model::{
        api::auth::IdentityAssertion,
        auth::Rights,
        db::voter::{NewVoter, Voter},
        mongodb::{Coll, Id},
    };

    /// Authenticate the client as the given subject through the real
    /// session route, replacing any previous auth cookie.
    pub async fn login_as(client: &Client, id: Id, rights: Rights) {
        let config = client.rocket().state::<Config>().unwrap();
        let assertion = IdentityAssertion::sign(id, rights, config);
        let response = client
            .post(uri!(crate::api::auth::create_session))
            .header(ContentType::JSON)
            .body(rocket::serde::json::json!(assertion).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), rocket::http::Status::NoContent);
    }

    /// Insert the given voter and authenticate the client as them.
    pub async fn login_voter(client: &Client, db: &Database, voter: NewVoter) -> Voter {
        let id: Id = Coll::<NewVoter>::from_db(db)
            .insert_one(&voter, None)
            .await
            .unwrap()
            .inserted_id
            .as_object_id()
            .unwrap()
            .into();
        login_as(client, id, Rights::Voter).await;
        Voter { id, voter }
    }

    /// Authenticate the client as a committee admin.
    pub async fn login_admin(client: &Client) -> Id {
        let id = Id::new();
        login_as(client, id, Rights::Admin).await;
        id
    }
}
