use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::{Coll, Id};

/// A counter object used to implement auto-increment fields,
/// keyed by a caller-chosen string.
///
/// Candidate numbers are allocated from one counter per
/// (election, position), see [`candidate_number_counter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub key: String,
    pub next: u64,
}

impl Counter {
    /// Atomically retrieve the next value of the counter with the given key,
    /// creating the counter at 1 if it does not exist yet.
    pub async fn next(counters: &Coll<Counter>, key: &str) -> Result<u64> {
        let update = doc! {
            "$inc": { "next": 1 }
        };
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = counters
            .find_one_and_update(doc! { "_id": key }, update, options)
            .await?
            .expect("upsert always returns a document");
        Ok(counter.next)
    }
}

/// The counter key for candidate numbers within one position of one election.
pub fn candidate_number_counter(election_id: Id, position_id: Id) -> String {
    format!("candidate_number:{}:{}", election_id, position_id)
}
