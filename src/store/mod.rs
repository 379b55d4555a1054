//! Persistence behind a trait, so that vote casting can be exercised against
//! an in-process store as well as MongoDB.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use mongodb::error::Error as DbError;
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};
use thiserror::Error;

use crate::error::Error;
use crate::model::{
    common::{CandidateId, LoginCode, PositionId, VoterId, VoterStatus},
    db::{Candidate, CandidateCore, ElectionSettings, NewCandidate, Position, Voter},
};
use crate::voting::AcceptedBallot;

mod memory;
mod mongo;

#[cfg(test)]
pub mod fixtures;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] DbError),
    /// A conditional write found different data from what was read.
    #[error("Record was modified concurrently")]
    Conflict,
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("No position with ID '{0}'")]
    UnknownPosition(PositionId),
    #[error("Position '{0}' still has candidates")]
    PositionInUse(PositionId),
    /// Stored data is missing something the server set up at launch.
    #[error("Store is corrupt: {0}")]
    Corrupt(String),
}

/// Everything needed to validate a ballot, as read inside a vote transaction.
#[derive(Debug, Clone)]
pub struct BallotSnapshot {
    pub voter: Voter,
    pub settings: ElectionSettings,
    pub positions: Vec<Position>,
    pub candidates: Vec<Candidate>,
}

/// An administrator's edit to a voter, applied only if the voter's status is
/// still `expected_status`.
#[derive(Debug, Clone)]
pub struct VoterUpdate {
    pub name: String,
    pub status: VoterStatus,
    pub expected_status: VoterStatus,
}

/// One attempt at casting a ballot.
///
/// Reads happen through [`VoteTransaction::snapshot`]; [`VoteTransaction::commit`]
/// then applies the ballot only if nothing it depends on has changed since,
/// failing with [`StoreError::Conflict`] otherwise. Dropping a transaction
/// without committing discards it.
#[rocket::async_trait]
pub trait VoteTransaction: Send {
    /// Read the voter and the catalog. `None` if the voter does not exist.
    async fn snapshot(&mut self, voter: &VoterId) -> Result<Option<BallotSnapshot>, StoreError>;

    /// Mark the voter as voted and add one vote to each picked candidate, as
    /// a single all-or-nothing unit.
    async fn commit(&mut self, ballot: &AcceptedBallot) -> Result<(), StoreError>;
}

/// Election persistence.
#[rocket::async_trait]
pub trait ElectionStore: Send + Sync {
    /// Insert a new voter. Fails with `Duplicate` if the email or login code is taken.
    async fn insert_voter(&self, voter: &Voter) -> Result<(), StoreError>;
    async fn voter(&self, id: &VoterId) -> Result<Option<Voter>, StoreError>;
    async fn voter_by_code(&self, code: &LoginCode) -> Result<Option<Voter>, StoreError>;
    async fn voters(&self) -> Result<Vec<Voter>, StoreError>;
    /// Apply an administrator edit. `Ok(false)` if there is no such voter,
    /// `Conflict` if their status has moved on.
    async fn update_voter(&self, id: &VoterId, update: &VoterUpdate) -> Result<bool, StoreError>;
    async fn delete_voter(&self, id: &VoterId) -> Result<bool, StoreError>;

    async fn insert_position(&self, position: &Position) -> Result<(), StoreError>;
    /// All positions, ordered by ID.
    async fn positions(&self) -> Result<Vec<Position>, StoreError>;
    async fn rename_position(&self, id: &PositionId, title: &str) -> Result<bool, StoreError>;
    /// Delete a position. Fails with `PositionInUse` if any candidate stands for it.
    async fn delete_position(&self, id: &PositionId) -> Result<bool, StoreError>;

    /// Insert a candidate with a fresh ID and no votes.
    async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<Candidate, StoreError>;
    /// All candidates, ordered by ID.
    async fn candidates(&self) -> Result<Vec<Candidate>, StoreError>;
    async fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, StoreError>;
    /// Replace a candidate's profile. Never touches their votes.
    async fn update_candidate(
        &self,
        id: CandidateId,
        candidate: &CandidateCore,
    ) -> Result<bool, StoreError>;
    async fn delete_candidate(&self, id: CandidateId) -> Result<bool, StoreError>;

    async fn settings(&self) -> Result<ElectionSettings, StoreError>;
    async fn set_settings(&self, settings: &ElectionSettings) -> Result<(), StoreError>;

    /// Start casting a ballot.
    async fn begin_vote(&self) -> Result<Box<dyn VoteTransaction>, StoreError>;

    /// Current vote count of every candidate.
    async fn tallies(&self) -> Result<HashMap<CandidateId, u64>, StoreError> {
        Ok(self
            .candidates()
            .await?
            .into_iter()
            .map(|candidate| (candidate.id, candidate.votes))
            .collect())
    }
}

/// The store in use, shared between requests as managed state.
#[derive(Clone)]
pub struct Store(Arc<dyn ElectionStore>);

impl Store {
    pub fn new(store: impl ElectionStore + 'static) -> Self {
        Self(Arc::new(store))
    }
}

impl Deref for Store {
    type Target = dyn ElectionStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Store {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.rocket().state::<Store>() {
            Some(store) => Outcome::Success(store.clone()),
            None => {
                let status = Status::InternalServerError;
                Outcome::Failure((status, Error::Status(status, "No store configured".into())))
            }
        }
    }
}
