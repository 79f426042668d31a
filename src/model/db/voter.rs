use std::fmt::{self, Display, Formatter};
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::{
    common::election::YearLevel,
    db::{election::Election, position::Position},
    mongodb::Id,
};

/// Core voter user data, as stored in the database.
/// The roster itself is maintained by the registration subsystem;
/// the engine only reads these flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// School-issued student number, unique across the roster.
    pub student_number: String,
    /// False once the account is deactivated.
    pub active: bool,
    /// True once registration is complete.
    pub registered: bool,
    /// False while the account password is locked or pending reset.
    pub password_active: bool,
    /// Class officers are the only voters in departmental elections.
    pub class_officer: bool,
    /// Foreign key department ID.
    pub department_id: Id,
    /// Current year level.
    pub year_level: YearLevel,
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with their unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}

/// Why a voter may not start or submit a ballot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IneligibleReason {
    NotActive,
    NotRegistered,
    PasswordInactive,
    NotClassOfficer,
    WrongDepartment,
    YearLevelNotAllowed,
}

impl Display for IneligibleReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotActive => "account is not active",
            Self::NotRegistered => "voter is not registered",
            Self::PasswordInactive => "account password is not active",
            Self::NotClassOfficer => "voter is not a class officer",
            Self::WrongDepartment => "voter belongs to a different department",
            Self::YearLevelNotAllowed => "position is not open to this year level",
        };
        write!(f, "{msg}")
    }
}

/// The verdict of the eligibility evaluation, with every failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reasons: Vec<IneligibleReason>,
}

impl Eligibility {
    fn from_reasons(reasons: Vec<IneligibleReason>) -> Self {
        Self {
            eligible: reasons.is_empty(),
            reasons,
        }
    }
}

impl VoterCore {
    /// May this voter take part in an SSG election?
    ///
    /// Pure predicate; callers evaluate it both at ballot start and again
    /// at submission, since the roster may change in between.
    pub fn ssg_eligibility(&self) -> Eligibility {
        let mut reasons = Vec::new();
        if !self.active {
            reasons.push(IneligibleReason::NotActive);
        }
        if !self.registered {
            reasons.push(IneligibleReason::NotRegistered);
        }
        if !self.password_active {
            reasons.push(IneligibleReason::PasswordInactive);
        }
        Eligibility::from_reasons(reasons)
    }

    /// May this voter vote for the given position of a departmental election?
    ///
    /// Requires the SSG rules plus class officership, department membership,
    /// and an admitted year level.
    pub fn departmental_eligibility(&self, election: &Election, position: &Position) -> Eligibility {
        let mut reasons = self.ssg_eligibility().reasons;
        if !self.class_officer {
            reasons.push(IneligibleReason::NotClassOfficer);
        }
        if election.department_id != Some(self.department_id) {
            reasons.push(IneligibleReason::WrongDepartment);
        }
        if !position.admits(self.year_level) {
            reasons.push(IneligibleReason::YearLevelNotAllowed);
        }
        Eligibility::from_reasons(reasons)
    }
}
