use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::{Coll, Id};

/// The engine-side audit events consumed by the observability subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    BallotStarted,
    Voted,
    BallotAbandoned,
    BallotExpiredDeleted,
}

/// An audit event awaiting insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub kind: AuditEventKind,
    pub voter_id: Id,
    pub election_id: Id,
    pub ballot_id: Option<Id>,
    pub position_id: Option<Id>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub at: DateTime<Utc>,
}

impl NewAuditEvent {
    pub fn new(kind: AuditEventKind, voter_id: Id, election_id: Id) -> Self {
        Self {
            kind,
            voter_id,
            election_id,
            ballot_id: None,
            position_id: None,
            at: Utc::now(),
        }
    }

    pub fn for_ballot(mut self, ballot_id: Id) -> Self {
        self.ballot_id = Some(ballot_id);
        self
    }

    pub fn for_position(mut self, position_id: impl Into<Option<Id>>) -> Self {
        self.position_id = position_id.into();
        self
    }

    /// Record this event, fire-and-forget: a failed write is logged and
    /// swallowed so it can never block or fail the voting path.
    pub async fn record(self, audit_log: &Coll<NewAuditEvent>) {
        let kind = self.kind;
        if let Err(e) = audit_log.insert_one(&self, None).await {
            warn!("Failed to record audit event {kind:?}: {e}");
        }
    }
}
