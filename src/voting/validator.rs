use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    api::ballot::Selection,
    common::{CandidateId, PositionId, VoterId, VoterStatus},
};
use crate::store::BallotSnapshot;

use super::VoteError;

/// How to treat positions that nobody is standing for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPositionRule {
    /// Ballots need not (and cannot) select anyone for them.
    #[default]
    Exempt,
    /// Every position needs a selection, so no ballot is complete until every
    /// position has a candidate.
    Require,
}

/// A selected candidate, with the tally that was read when the ballot was validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    pub position_id: PositionId,
    pub candidate_id: CandidateId,
    pub votes_read: u64,
}

/// A ballot that passed validation against a snapshot, ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedBallot {
    pub voter_id: VoterId,
    pub picks: Vec<Pick>,
}

/// Check a ballot against a snapshot of the election. Checks run in a fixed
/// order and the first failure is reported: voting window, voter status,
/// completeness, referential validity, then duplicate positions.
pub fn validate_ballot(
    now: DateTime<Utc>,
    snapshot: &BallotSnapshot,
    selections: &[Selection],
    rule: EmptyPositionRule,
) -> Result<AcceptedBallot, VoteError> {
    let window = snapshot.settings.window(now);
    if !window.is_open() {
        return Err(VoteError::VotingClosed(window));
    }

    match snapshot.voter.status {
        VoterStatus::Eligible => {}
        VoterStatus::Voted => return Err(VoteError::AlreadyVoted),
        VoterStatus::Ineligible => return Err(VoteError::NotEligible),
    }

    let missing = snapshot
        .positions
        .iter()
        .filter(|position| {
            rule == EmptyPositionRule::Require
                || snapshot
                    .candidates
                    .iter()
                    .any(|c| c.position == position.id)
        })
        .filter(|position| !selections.iter().any(|s| s.position_id == position.id))
        .map(|position| position.id.clone())
        .collect::<Vec<_>>();
    if selections.is_empty() || !missing.is_empty() {
        return Err(VoteError::IncompleteBallot { missing });
    }

    let mut picks = Vec::with_capacity(selections.len());
    for selection in selections {
        let position_exists = snapshot
            .positions
            .iter()
            .any(|p| p.id == selection.position_id);
        let candidate = snapshot
            .candidates
            .iter()
            .find(|c| c.id == selection.candidate_id);
        match candidate {
            Some(candidate) if position_exists && candidate.position == selection.position_id => {
                picks.push(Pick {
                    position_id: selection.position_id.clone(),
                    candidate_id: candidate.id,
                    votes_read: candidate.votes,
                });
            }
            _ => {
                return Err(VoteError::InvalidSelection {
                    position: selection.position_id.clone(),
                    candidate: selection.candidate_id,
                })
            }
        }
    }

    let mut seen = HashSet::new();
    for pick in &picks {
        if !seen.insert(&pick.position_id) {
            return Err(VoteError::DuplicateSelection {
                position: pick.position_id.clone(),
            });
        }
    }

    Ok(AcceptedBallot {
        voter_id: snapshot.voter.id.clone(),
        picks,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::model::common::WindowState;
    use crate::model::db::{Candidate, CandidateCore, ElectionSettings, Position, Voter};

    struct Election {
        snapshot: BallotSnapshot,
        president: PositionId,
        treasurer: PositionId,
    }

    fn election() -> Election {
        let president = Position::president();
        let treasurer = Position::treasurer();
        let candidates = vec![
            Candidate::new(CandidateId(1), CandidateCore::new("Ada", president.id.clone())),
            Candidate::new(CandidateId(2), CandidateCore::new("Grace", president.id.clone())),
            Candidate::new(CandidateId(3), CandidateCore::new("Linus", treasurer.id.clone())),
        ];
        Election {
            president: president.id.clone(),
            treasurer: treasurer.id.clone(),
            snapshot: BallotSnapshot {
                voter: Voter::example(),
                settings: ElectionSettings::default(),
                positions: vec![president, treasurer],
                candidates,
            },
        }
    }

    fn validate(snapshot: &BallotSnapshot, selections: &[Selection]) -> Result<AcceptedBallot, VoteError> {
        validate_ballot(Utc::now(), snapshot, selections, EmptyPositionRule::Exempt)
    }

    #[test]
    fn complete_ballot_is_accepted() {
        let mut e = election();
        e.snapshot.candidates[0].votes = 7;
        let ballot = validate(
            &e.snapshot,
            &[
                Selection::new(e.president.clone(), CandidateId(1)),
                Selection::new(e.treasurer.clone(), CandidateId(3)),
            ],
        )
        .unwrap();
        assert_eq!(ballot.voter_id, e.snapshot.voter.id);
        assert_eq!(ballot.picks.len(), 2);
        assert_eq!(ballot.picks[0].votes_read, 7);
        assert_eq!(ballot.picks[1].candidate_id, CandidateId(3));
    }

    #[test]
    fn closed_window_is_checked_first() {
        let mut e = election();
        let now = Utc::now();
        e.snapshot.settings =
            ElectionSettings::new(Some(now + Duration::hours(1)), None).unwrap();
        e.snapshot.voter.status = VoterStatus::Voted;
        assert!(matches!(
            validate_ballot(now, &e.snapshot, &[], EmptyPositionRule::Exempt),
            Err(VoteError::VotingClosed(WindowState::Pending))
        ));
    }

    #[test]
    fn status_is_checked_before_contents() {
        let mut e = election();
        e.snapshot.voter.status = VoterStatus::Voted;
        assert!(matches!(validate(&e.snapshot, &[]), Err(VoteError::AlreadyVoted)));
        e.snapshot.voter.status = VoterStatus::Ineligible;
        assert!(matches!(validate(&e.snapshot, &[]), Err(VoteError::NotEligible)));
    }

    #[test]
    fn every_contested_position_needs_a_selection() {
        let e = election();
        let result = validate(&e.snapshot, &[Selection::new(e.president.clone(), CandidateId(1))]);
        match result {
            Err(VoteError::IncompleteBallot { missing }) => assert_eq!(missing, [e.treasurer]),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            validate(&e.snapshot, &[]),
            Err(VoteError::IncompleteBallot { .. })
        ));
    }

    #[test]
    fn empty_positions_follow_the_rule() {
        let mut e = election();
        let mascot = Position::new("Mascot").unwrap();
        e.snapshot.positions.push(mascot.clone());
        let selections = [
            Selection::new(e.president.clone(), CandidateId(2)),
            Selection::new(e.treasurer.clone(), CandidateId(3)),
        ];

        assert!(validate(&e.snapshot, &selections).is_ok());
        match validate_ballot(Utc::now(), &e.snapshot, &selections, EmptyPositionRule::Require) {
            Err(VoteError::IncompleteBallot { missing }) => assert_eq!(missing, [mascot.id]),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn candidate_must_stand_for_the_selected_position() {
        let e = election();
        let mismatched = [
            Selection::new(e.president.clone(), CandidateId(3)),
            Selection::new(e.treasurer.clone(), CandidateId(3)),
        ];
        assert!(matches!(
            validate(&e.snapshot, &mismatched),
            Err(VoteError::InvalidSelection { candidate: CandidateId(3), .. })
        ));

        let unknown_candidate = [
            Selection::new(e.president.clone(), CandidateId(99)),
            Selection::new(e.treasurer.clone(), CandidateId(3)),
        ];
        assert!(matches!(
            validate(&e.snapshot, &unknown_candidate),
            Err(VoteError::InvalidSelection { candidate: CandidateId(99), .. })
        ));

        let unknown_position = [
            Selection::new(e.president.clone(), CandidateId(1)),
            Selection::new(e.treasurer.clone(), CandidateId(3)),
            Selection::new(PositionId::from_title("Mascot").unwrap(), CandidateId(1)),
        ];
        assert!(matches!(
            validate(&e.snapshot, &unknown_position),
            Err(VoteError::InvalidSelection { .. })
        ));
    }

    #[test]
    fn one_selection_per_position() {
        let e = election();
        let selections = [
            Selection::new(e.president.clone(), CandidateId(1)),
            Selection::new(e.president.clone(), CandidateId(2)),
            Selection::new(e.treasurer.clone(), CandidateId(3)),
        ];
        match validate(&e.snapshot, &selections) {
            Err(VoteError::DuplicateSelection { position }) => assert_eq!(position, e.president),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
