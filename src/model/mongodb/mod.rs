mod bson;
mod collection;
mod counter;
pub mod errors;

pub use bson::{now_millis, serde_option_datetime, Id};
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use counter::{candidate_number_counter, Counter};
