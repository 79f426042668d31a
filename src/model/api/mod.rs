pub mod auth;
pub mod ballot;
pub mod position;
pub mod tally;
