pub mod audit;
pub mod ballot;
pub mod candidate;
pub mod election;
pub mod position;
pub mod vote;
pub mod voter;
