use serde::{Deserialize, Serialize};

use crate::model::{
    api::voter::VoterDesc,
    common::{CandidateId, PositionId, VoterStatus},
    db::{Candidate, Position, Voter},
};

/// One candidate's line in the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub id: CandidateId,
    pub name: String,
    pub votes: u64,
}

/// Results for a single position, leading candidate first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionResults {
    pub id: PositionId,
    pub title: String,
    pub total_votes: u64,
    pub candidates: Vec<CandidateTally>,
}

/// Results for every position, in position ID order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub positions: Vec<PositionResults>,
}

impl ElectionResults {
    /// Group the candidates' tallies by position.
    pub fn tabulate(positions: Vec<Position>, candidates: &[Candidate]) -> Self {
        let positions = positions
            .into_iter()
            .map(|position| {
                let mut tallies = candidates
                    .iter()
                    .filter(|c| c.position == position.id)
                    .map(|c| CandidateTally {
                        id: c.id,
                        name: c.name.clone(),
                        votes: c.votes,
                    })
                    .collect::<Vec<_>>();
                tallies.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.id.cmp(&b.id)));
                PositionResults {
                    total_votes: tallies.iter().map(|t| t.votes).sum(),
                    id: position.id,
                    title: position.title,
                    candidates: tallies,
                }
            })
            .collect();
        Self { positions }
    }
}

/// Voter participation figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turnout {
    pub registered: usize,
    pub voted: usize,
    pub eligible: usize,
    pub ineligible: usize,
    /// Voted as a percentage of everyone who was ever able to vote.
    pub turnout_percent: f64,
}

impl Turnout {
    pub fn count(voters: &[Voter]) -> Self {
        let count = |status| voters.iter().filter(|v| v.status == status).count();
        let voted = count(VoterStatus::Voted);
        let eligible = count(VoterStatus::Eligible);
        let ineligible = count(VoterStatus::Ineligible);
        let could_vote = voted + eligible;
        let turnout_percent = if could_vote == 0 {
            0.0
        } else {
            100.0 * voted as f64 / could_vote as f64
        };
        Self {
            registered: voters.len(),
            voted,
            eligible,
            ineligible,
            turnout_percent,
        }
    }
}

/// The administrator's end-of-election report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionReport {
    pub turnout: Turnout,
    pub results: ElectionResults,
    /// Everyone who voted, for auditing. Never includes their choices.
    pub voted: Vec<VoterDesc>,
}
