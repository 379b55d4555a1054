use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a voter is in the election lifecycle.
///
/// `Eligible -> Voted` happens only when a ballot commits. Administrators may
/// move a voter between `Eligible` and `Ineligible`, but `Voted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoterStatus {
    Eligible,
    Voted,
    Ineligible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusTransitionError {
    #[error("Voter has already voted; their status can no longer be changed")]
    AlreadyVoted,
    #[error("Only a committed ballot can mark a voter as voted")]
    VotedIsReserved,
}

impl VoterStatus {
    /// The status an administrator edit from `self` to `target` produces.
    ///
    /// Administrators may bar a voter and may also reinstate one they barred,
    /// since the voter editor lets them set any status except `Voted`. A voter
    /// who has voted can never be edited again.
    pub fn admin_transition(self, target: VoterStatus) -> Result<VoterStatus, StatusTransitionError> {
        use VoterStatus::*;

        match (self, target) {
            (Eligible, Eligible) | (Ineligible, Ineligible) => Ok(self),
            (Eligible, Ineligible) | (Ineligible, Eligible) => Ok(target),
            (Voted, Eligible) | (Voted, Voted) | (Voted, Ineligible) => {
                Err(StatusTransitionError::AlreadyVoted)
            }
            (Eligible, Voted) | (Ineligible, Voted) => Err(StatusTransitionError::VotedIsReserved),
        }
    }

    pub fn has_voted(self) -> bool {
        matches!(self, VoterStatus::Voted)
    }
}

impl From<VoterStatus> for Bson {
    fn from(status: VoterStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
