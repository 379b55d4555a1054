//! Vote casting: ballot validation and the transactional vote applier.

mod applier;
mod validator;

pub use applier::{cast_vote, VotePolicy, VoteReceipt};
pub use validator::{validate_ballot, AcceptedBallot, EmptyPositionRule, Pick};

use thiserror::Error;

use crate::model::common::{CandidateId, PositionId, VoterId, WindowState};
use crate::store::StoreError;

/// Why a ballot was not counted.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("Voting is not open (the election is {0:?})")]
    VotingClosed(WindowState),
    #[error("Voter is not eligible to vote")]
    NotEligible,
    #[error("Voter has already voted")]
    AlreadyVoted,
    #[error("Ballot has no selection for: {}", join(.missing))]
    IncompleteBallot { missing: Vec<PositionId> },
    #[error("Candidate {candidate} is not standing for position '{position}'")]
    InvalidSelection {
        position: PositionId,
        candidate: CandidateId,
    },
    #[error("Ballot has more than one selection for position '{position}'")]
    DuplicateSelection { position: PositionId },
    #[error("Ballot could not be recorded after {attempts} attempts, please try again")]
    VoteFailed { attempts: u32 },
    #[error("No voter with ID {0}")]
    UnknownVoter(VoterId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VoteError {
    /// A stable name for this kind of error, for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            VoteError::VotingClosed(_) => "VotingClosed",
            VoteError::NotEligible => "NotEligible",
            VoteError::AlreadyVoted => "AlreadyVoted",
            VoteError::IncompleteBallot { .. } => "IncompleteBallot",
            VoteError::InvalidSelection { .. } => "InvalidSelection",
            VoteError::DuplicateSelection { .. } => "DuplicateSelection",
            VoteError::VoteFailed { .. } => "VoteFailed",
            VoteError::UnknownVoter(_) => "UnknownVoter",
            VoteError::Store(_) => "StoreError",
        }
    }
}

fn join(ids: &[PositionId]) -> String {
    if ids.is_empty() {
        return "any position".to_string();
    }
    ids.iter()
        .map(PositionId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
