use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use rocket::tokio::sync::{Barrier, RwLock};

use crate::model::{
    common::{CandidateId, LoginCode, PositionId, VoterId, VoterStatus},
    db::{Candidate, CandidateCore, ElectionSettings, NewCandidate, Position, Voter},
};
use crate::voting::AcceptedBallot;

use super::{BallotSnapshot, ElectionStore, StoreError, VoteTransaction, VoterUpdate};

/// An in-process store, for development and tests.
///
/// All state sits behind one lock. Any change to positions, candidate
/// profiles, or settings bumps a revision number, and a vote commit is
/// refused if the revision it read has moved on.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    interleave: Arc<Mutex<Option<Interleave>>>,
    rejections: Arc<AtomicUsize>,
}

struct State {
    voters: BTreeMap<VoterId, Voter>,
    positions: BTreeMap<PositionId, Position>,
    candidates: BTreeMap<CandidateId, Candidate>,
    settings: ElectionSettings,
    next_candidate_id: u32,
    revision: u64,
}

/// Commits that still have to wait for each other. Only tests set this up.
#[cfg_attr(not(test), allow(dead_code))]
struct Interleave {
    barrier: Arc<Barrier>,
    remaining: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let state = State {
            voters: BTreeMap::new(),
            positions: BTreeMap::new(),
            candidates: BTreeMap::new(),
            settings: ElectionSettings::default(),
            next_candidate_id: 1,
            revision: 0,
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            interleave: Arc::new(Mutex::new(None)),
            rejections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `n` vote commits fail with a conflict, as if another
    /// writer always got there first.
    #[cfg(test)]
    pub fn reject_commits(&self, n: usize) {
        self.rejections.store(n, Ordering::SeqCst);
    }

    fn take_rejection(&self) -> bool {
        self.rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Make the next `n` vote commits wait for each other before any of them
    /// applies, so that they all validate against the same snapshot.
    #[cfg(test)]
    pub fn interleave_commits(&self, n: usize) {
        let mut interleave = self.interleave.lock().unwrap_or_else(|e| e.into_inner());
        *interleave = (n > 0).then(|| Interleave {
            barrier: Arc::new(Barrier::new(n)),
            remaining: n,
        });
    }

    /// Claim a place at the interleaving barrier, if one is set up.
    fn interleave_barrier(&self) -> Option<Arc<Barrier>> {
        let mut guard = self.interleave.lock().unwrap_or_else(|e| e.into_inner());
        let interleave = guard.as_mut()?;
        let barrier = interleave.barrier.clone();
        interleave.remaining -= 1;
        if interleave.remaining == 0 {
            *guard = None;
        }
        Some(barrier)
    }
}

#[rocket::async_trait]
impl ElectionStore for MemoryStore {
    async fn insert_voter(&self, voter: &Voter) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.voters.contains_key(&voter.id) {
            return Err(StoreError::Duplicate(format!("Voter {}", voter.id)));
        }
        if state
            .voters
            .values()
            .any(|v| v.login_code == voter.login_code)
        {
            return Err(StoreError::Duplicate("Login code".to_string()));
        }
        state.voters.insert(voter.id.clone(), voter.clone());
        Ok(())
    }

    async fn voter(&self, id: &VoterId) -> Result<Option<Voter>, StoreError> {
        Ok(self.state.read().await.voters.get(id).cloned())
    }

    async fn voter_by_code(&self, code: &LoginCode) -> Result<Option<Voter>, StoreError> {
        let state = self.state.read().await;
        Ok(state.voters.values().find(|v| &v.login_code == code).cloned())
    }

    async fn voters(&self) -> Result<Vec<Voter>, StoreError> {
        Ok(self.state.read().await.voters.values().cloned().collect())
    }

    async fn update_voter(&self, id: &VoterId, update: &VoterUpdate) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(voter) = state.voters.get_mut(id) else {
            return Ok(false);
        };
        if voter.status != update.expected_status {
            return Err(StoreError::Conflict);
        }
        voter.name = update.name.clone();
        voter.status = update.status;
        Ok(true)
    }

    async fn delete_voter(&self, id: &VoterId) -> Result<bool, StoreError> {
        Ok(self.state.write().await.voters.remove(id).is_some())
    }

    async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.positions.contains_key(&position.id) {
            return Err(StoreError::Duplicate(format!("Position {}", position.id)));
        }
        state.positions.insert(position.id.clone(), position.clone());
        state.revision += 1;
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self.state.read().await.positions.values().cloned().collect())
    }

    async fn rename_position(&self, id: &PositionId, title: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(position) = state.positions.get_mut(id) else {
            return Ok(false);
        };
        position.title = title.to_string();
        state.revision += 1;
        Ok(true)
    }

    async fn delete_position(&self, id: &PositionId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.candidates.values().any(|c| &c.position == id) {
            return Err(StoreError::PositionInUse(id.clone()));
        }
        let removed = state.positions.remove(id).is_some();
        if removed {
            state.revision += 1;
        }
        Ok(removed)
    }

    async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<Candidate, StoreError> {
        let mut state = self.state.write().await;
        if !state.positions.contains_key(&candidate.position) {
            return Err(StoreError::UnknownPosition(candidate.position.clone()));
        }
        let id = CandidateId(state.next_candidate_id);
        state.next_candidate_id += 1;
        let candidate = Candidate::new(id, candidate.clone());
        state.candidates.insert(id, candidate.clone());
        state.revision += 1;
        Ok(candidate)
    }

    async fn candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(self.state.read().await.candidates.values().cloned().collect())
    }

    async fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, StoreError> {
        Ok(self.state.read().await.candidates.get(&id).cloned())
    }

    async fn update_candidate(
        &self,
        id: CandidateId,
        candidate: &CandidateCore,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if !state.positions.contains_key(&candidate.position) {
            return Err(StoreError::UnknownPosition(candidate.position.clone()));
        }
        let Some(existing) = state.candidates.get_mut(&id) else {
            return Ok(false);
        };
        existing.candidate = candidate.clone();
        state.revision += 1;
        Ok(true)
    }

    async fn delete_candidate(&self, id: CandidateId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let removed = state.candidates.remove(&id).is_some();
        if removed {
            state.revision += 1;
        }
        Ok(removed)
    }

    async fn settings(&self) -> Result<ElectionSettings, StoreError> {
        Ok(self.state.read().await.settings)
    }

    async fn set_settings(&self, settings: &ElectionSettings) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.settings = *settings;
        state.revision += 1;
        Ok(())
    }

    async fn begin_vote(&self) -> Result<Box<dyn VoteTransaction>, StoreError> {
        Ok(Box::new(MemoryVote {
            store: self.clone(),
            revision: None,
        }))
    }
}

/// A vote transaction against a [`MemoryStore`].
struct MemoryVote {
    store: MemoryStore,
    /// The catalog revision seen by `snapshot`.
    revision: Option<u64>,
}

#[rocket::async_trait]
impl VoteTransaction for MemoryVote {
    async fn snapshot(&mut self, voter: &VoterId) -> Result<Option<BallotSnapshot>, StoreError> {
        let state = self.store.state.read().await;
        self.revision = Some(state.revision);
        let Some(voter) = state.voters.get(voter).cloned() else {
            return Ok(None);
        };
        Ok(Some(BallotSnapshot {
            voter,
            settings: state.settings,
            positions: state.positions.values().cloned().collect(),
            candidates: state.candidates.values().cloned().collect(),
        }))
    }

    async fn commit(&mut self, ballot: &AcceptedBallot) -> Result<(), StoreError> {
        if let Some(barrier) = self.store.interleave_barrier() {
            trace!("Waiting for interleaved commits");
            barrier.wait().await;
        }

        if self.store.take_rejection() {
            return Err(StoreError::Conflict);
        }

        let mut state = self.store.state.write().await;
        if self.revision != Some(state.revision) {
            debug!("Catalog changed since the ballot was validated");
            return Err(StoreError::Conflict);
        }

        // Check every guard before writing anything.
        match state.voters.get(&ballot.voter_id) {
            Some(voter) if voter.status == VoterStatus::Eligible => {}
            _ => return Err(StoreError::Conflict),
        }
        for pick in &ballot.picks {
            match state.candidates.get(&pick.candidate_id) {
                Some(c) if c.position == pick.position_id && c.votes == pick.votes_read => {}
                _ => return Err(StoreError::Conflict),
            }
        }

        for pick in &ballot.picks {
            if let Some(candidate) = state.candidates.get_mut(&pick.candidate_id) {
                candidate.votes += 1;
            }
        }
        if let Some(voter) = state.voters.get_mut(&ballot.voter_id) {
            voter.status = VoterStatus::Voted;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::Fixture;

    #[rocket::async_test]
    async fn candidate_ids_increase() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        assert!(fixture.ada < fixture.grace);
        assert!(fixture.grace < fixture.linus);
        let ids = store
            .candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, [fixture.ada, fixture.grace, fixture.linus]);
    }

    #[rocket::async_test]
    async fn positions_with_candidates_cannot_be_deleted() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        assert!(matches!(
            store.delete_position(&fixture.president).await,
            Err(StoreError::PositionInUse(_))
        ));
        store.delete_candidate(fixture.linus).await.unwrap();
        assert!(store.delete_position(&fixture.treasurer).await.unwrap());
    }

    #[rocket::async_test]
    async fn candidates_must_stand_for_a_live_position() {
        let store = MemoryStore::new();
        let candidate = CandidateCore::new("Nobody", PositionId::from_title("Mascot").unwrap());
        assert!(matches!(
            store.insert_candidate(&candidate).await,
            Err(StoreError::UnknownPosition(_))
        ));
    }

    #[rocket::async_test]
    async fn voter_updates_are_conditional_on_status() {
        let store = MemoryStore::new();
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();

        let update = VoterUpdate {
            name: voter.name.clone(),
            status: VoterStatus::Ineligible,
            expected_status: VoterStatus::Voted,
        };
        assert!(matches!(
            store.update_voter(&voter.id, &update).await,
            Err(StoreError::Conflict)
        ));

        let update = VoterUpdate {
            expected_status: VoterStatus::Eligible,
            ..update
        };
        assert!(store.update_voter(&voter.id, &update).await.unwrap());
        let stored = store.voter(&voter.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VoterStatus::Ineligible);
    }

    #[rocket::async_test]
    async fn duplicate_voters_and_codes_are_rejected() {
        let store = MemoryStore::new();
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();
        assert!(matches!(
            store.insert_voter(&voter).await,
            Err(StoreError::Duplicate(_))
        ));

        let same_code = Voter {
            login_code: voter.login_code.clone(),
            ..Voter::example2()
        };
        assert!(matches!(
            store.insert_voter(&same_code).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[rocket::async_test]
    async fn stale_catalog_snapshot_conflicts() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();

        let mut txn = store.begin_vote().await.unwrap();
        let snapshot = txn.snapshot(&voter.id).await.unwrap().unwrap();
        store.rename_position(&fixture.president, "Chair").await.unwrap();

        let ballot = fixture.ballot_for(&snapshot, &[fixture.ada, fixture.linus]);
        assert!(matches!(txn.commit(&ballot).await, Err(StoreError::Conflict)));
        assert_eq!(store.tallies().await.unwrap()[&fixture.ada], 0);
    }
}
