//! A small seeded election shared by tests.

use crate::model::{
    api::ballot::Selection,
    common::{CandidateId, PositionId},
    db::{CandidateCore, Position},
};
use crate::voting::{AcceptedBallot, Pick};

use super::{BallotSnapshot, ElectionStore};

/// Two positions: President (Ada, Grace) and Treasurer (Linus).
pub struct Fixture {
    pub president: PositionId,
    pub treasurer: PositionId,
    pub ada: CandidateId,
    pub grace: CandidateId,
    pub linus: CandidateId,
}

impl Fixture {
    pub async fn seed(store: &dyn ElectionStore) -> Self {
        let president = Position::president();
        let treasurer = Position::treasurer();
        store.insert_position(&president).await.unwrap();
        store.insert_position(&treasurer).await.unwrap();

        let ada = add_candidate(store, "Ada Lovelace", &president.id).await;
        let grace = add_candidate(store, "Grace Hopper", &president.id).await;
        let linus = add_candidate(store, "Linus Torvalds", &treasurer.id).await;

        Self {
            president: president.id,
            treasurer: treasurer.id,
            ada,
            grace,
            linus,
        }
    }

    /// A complete ballot: Ada for President, Linus for Treasurer.
    pub fn ballot(&self) -> Vec<Selection> {
        vec![
            Selection::new(self.president.clone(), self.ada),
            Selection::new(self.treasurer.clone(), self.linus),
        ]
    }

    /// Build an accepted ballot for the given candidates directly from a
    /// snapshot, skipping validation.
    pub fn ballot_for(&self, snapshot: &BallotSnapshot, picks: &[CandidateId]) -> AcceptedBallot {
        let picks = picks
            .iter()
            .map(|id| {
                let candidate = snapshot
                    .candidates
                    .iter()
                    .find(|c| c.id == *id)
                    .unwrap();
                Pick {
                    position_id: candidate.position.clone(),
                    candidate_id: candidate.id,
                    votes_read: candidate.votes,
                }
            })
            .collect();
        AcceptedBallot {
            voter_id: snapshot.voter.id.clone(),
            picks,
        }
    }
}

async fn add_candidate(store: &dyn ElectionStore, name: &str, position: &PositionId) -> CandidateId {
    let candidate = CandidateCore::new(name, position.clone());
    store.insert_candidate(&candidate).await.unwrap().id
}
