//! Database fixtures shared by the API integration tests.

use mongodb::Database;

use crate::model::{
    db::{
        candidate::{Candidate, NewCandidate},
        election::{Election, ElectionCore},
        position::{Position, PositionCore},
    },
    mongodb::{Coll, Counter, Id},
};

pub async fn insert_election(db: &Database, core: ElectionCore) -> Election {
    let election = Election {
        id: Id::new(),
        election: core,
    };
    Coll::<Election>::from_db(db)
        .insert_one(&election, None)
        .await
        .unwrap();
    election
}

pub async fn insert_ssg_election(db: &Database) -> Election {
    insert_election(db, ElectionCore::ssg_example()).await
}

pub async fn insert_position(db: &Database, core: PositionCore) -> Position {
    let position = Position {
        id: Id::new(),
        position: core,
    };
    Coll::<Position>::from_db(db)
        .insert_one(&position, None)
        .await
        .unwrap();
    position
}

pub async fn insert_candidate(
    db: &Database,
    election_id: Id,
    position_id: Id,
    name: &str,
) -> Candidate {
    let counters = Coll::<Counter>::from_db(db);
    let core = NewCandidate::with_next_number(&counters, election_id, position_id, name)
        .await
        .unwrap();
    let id: Id = Coll::<NewCandidate>::from_db(db)
        .insert_one(&core, None)
        .await
        .unwrap()
        .inserted_id
        .as_object_id()
        .unwrap()
        .into();
    Candidate {
        id,
        candidate: core,
    }
}
