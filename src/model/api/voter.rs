use serde::{Deserialize, Serialize};

use crate::model::{
    common::{LoginCode, VoterId, VoterStatus},
    db::Voter,
};

/// A voter as they see themselves: no login code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterDesc {
    pub id: VoterId,
    pub name: String,
    pub status: VoterStatus,
}

impl From<Voter> for VoterDesc {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id,
            name: voter.name,
            status: voter.status,
        }
    }
}

/// A voter as administrators see them, including their login code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub id: VoterId,
    pub name: String,
    pub status: VoterStatus,
    pub login_code: LoginCode,
}

impl From<Voter> for VoterRecord {
    fn from(voter: Voter) -> Self {
        Self {
            id: voter.id,
            name: voter.name,
            status: voter.status,
            login_code: voter.login_code,
        }
    }
}

/// An administrator's edit to a voter.
///
/// `expected_status` is the status the administrator saw when they made the
/// edit. If given, the edit only applies if the voter's status still matches,
/// so an edit can never race a ballot commit unnoticed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterEdit {
    pub name: Option<String>,
    pub status: Option<VoterStatus>,
    pub expected_status: Option<VoterStatus>,
}

/// The result of registering a voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub voter_id: VoterId,
    /// Whether the login code email was accepted for delivery.
    pub code_sent: bool,
    pub message: String,
}

/// A newly created voter, returned to the administrator who created them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedVoter {
    #[serde(flatten)]
    pub voter: VoterRecord,
    pub code_sent: bool,
    pub message: String,
}
