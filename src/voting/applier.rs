use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use rocket::tokio::time::sleep;
use serde::{Deserialize, Serialize};

use crate::model::{api::ballot::Selection, common::VoterId};
use crate::store::{ElectionStore, StoreError};

use super::{validate_ballot, EmptyPositionRule, VoteError};

/// Backoff never grows beyond this multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 32;

/// How hard to try when a ballot commit conflicts with concurrent writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotePolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Base delay between attempts. Doubles on each retry, with full jitter.
    pub backoff: Duration,
    pub empty_positions: EmptyPositionRule,
}

impl VotePolicy {
    pub fn new(max_attempts: u32, backoff: Duration, empty_positions: EmptyPositionRule) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            empty_positions,
        }
    }

    /// A random delay before retry number `attempt` (starting from 1).
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .saturating_pow(attempt.saturating_sub(1))
            .min(MAX_BACKOFF_FACTOR);
        let cap = self.backoff.saturating_mul(factor).as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(0..=cap))
    }
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(20), EmptyPositionRule::default())
    }
}

/// Proof that a ballot was counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub voter_id: VoterId,
    pub selections: Vec<Selection>,
    pub cast_at: DateTime<Utc>,
    /// How many attempts the commit took.
    pub attempts: u32,
}

/// Cast a ballot for `voter_id`.
///
/// Each attempt reads a fresh snapshot inside a vote transaction, validates
/// the ballot against it, and commits the voter's status change together with
/// every tally increment. Validation failures are final. Conflicting commits
/// are retried with jittered backoff until `policy.max_attempts` is reached.
///
/// `now` is consulted once per attempt to evaluate the voting window.
pub async fn cast_vote<F>(
    store: &dyn ElectionStore,
    policy: &VotePolicy,
    voter_id: &VoterId,
    selections: &[Selection],
    now: F,
) -> Result<VoteReceipt, VoteError>
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let cast_at = now();
        debug!("Casting ballot for {voter_id}, attempt {attempt}/{max_attempts}");
        if try_cast(store, policy, voter_id, selections, cast_at).await? {
            info!("Recorded ballot for {voter_id} after {attempt} attempt(s)");
            return Ok(VoteReceipt {
                voter_id: voter_id.clone(),
                selections: selections.to_vec(),
                cast_at,
                attempts: attempt,
            });
        }
        if attempt < max_attempts {
            let delay = policy.delay(attempt);
            warn!(
                "Ballot for {voter_id} conflicted with a concurrent write, retrying in {}ms",
                delay.as_millis()
            );
            sleep(delay).await;
        }
    }
    warn!("Giving up on ballot for {voter_id} after {max_attempts} conflicting attempts");
    Err(VoteError::VoteFailed {
        attempts: max_attempts,
    })
}

/// One attempt. `Ok(false)` means the commit conflicted and may be retried.
async fn try_cast(
    store: &dyn ElectionStore,
    policy: &VotePolicy,
    voter_id: &VoterId,
    selections: &[Selection],
    now: DateTime<Utc>,
) -> Result<bool, VoteError> {
    let mut txn = match store.begin_vote().await {
        Ok(txn) => txn,
        Err(StoreError::Conflict) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let snapshot = match txn.snapshot(voter_id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Err(VoteError::UnknownVoter(voter_id.clone())),
        Err(StoreError::Conflict) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let ballot = validate_ballot(now, &snapshot, selections, policy.empty_positions)?;
    match txn.commit(&ballot).await {
        Ok(()) => Ok(true),
        Err(StoreError::Conflict) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rocket::futures::future::join_all;

    use super::*;
    use crate::model::{
        common::{VoterStatus, WindowState},
        db::{ElectionSettings, Voter},
    };
    use crate::store::{fixtures::Fixture, MemoryStore};

    fn policy(max_attempts: u32) -> VotePolicy {
        VotePolicy::new(max_attempts, Duration::from_millis(1), EmptyPositionRule::Exempt)
    }

    fn voter(n: usize) -> Voter {
        Voter::new(format!("voter{n}@uni.edu").parse().unwrap(), format!("Voter {n}"))
    }

    #[test]
    fn backoff_is_bounded() {
        let policy = VotePolicy::new(0, Duration::from_millis(10), EmptyPositionRule::Exempt);
        assert_eq!(policy.max_attempts, 1);
        for attempt in 1..20 {
            assert!(policy.delay(attempt) <= Duration::from_millis(10 * MAX_BACKOFF_FACTOR as u64));
        }
        assert_eq!(VotePolicy::new(3, Duration::ZERO, EmptyPositionRule::Exempt).delay(3), Duration::ZERO);
    }

    #[rocket::async_test]
    async fn single_vote_changes_exactly_its_candidates() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let alice = Voter::example();
        store.insert_voter(&alice).await.unwrap();

        let receipt = cast_vote(&store, &policy(5), &alice.id, &fixture.ballot(), Utc::now)
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 1);

        let tallies = store.tallies().await.unwrap();
        assert_eq!(tallies[&fixture.ada], 1);
        assert_eq!(tallies[&fixture.grace], 0);
        assert_eq!(tallies[&fixture.linus], 1);
        let alice = store.voter(&alice.id).await.unwrap().unwrap();
        assert_eq!(alice.status, VoterStatus::Voted);
    }

    #[rocket::async_test]
    async fn second_submission_is_rejected_without_effect() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let alice = Voter::example();
        store.insert_voter(&alice).await.unwrap();

        cast_vote(&store, &policy(5), &alice.id, &fixture.ballot(), Utc::now)
            .await
            .unwrap();
        let before = store.tallies().await.unwrap();
        let second = cast_vote(&store, &policy(5), &alice.id, &fixture.ballot(), Utc::now).await;
        assert!(matches!(second, Err(VoteError::AlreadyVoted)));
        assert_eq!(store.tallies().await.unwrap(), before);
    }

    #[rocket::async_test]
    async fn rejected_ballots_change_nothing() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let alice = Voter::example();
        store.insert_voter(&alice).await.unwrap();

        let incomplete = [Selection::new(fixture.president.clone(), fixture.ada)];
        let result = cast_vote(&store, &policy(5), &alice.id, &incomplete, Utc::now).await;
        assert!(matches!(result, Err(VoteError::IncompleteBallot { .. })));

        let invalid = [
            Selection::new(fixture.president.clone(), fixture.linus),
            Selection::new(fixture.treasurer.clone(), fixture.linus),
        ];
        let result = cast_vote(&store, &policy(5), &alice.id, &invalid, Utc::now).await;
        assert!(matches!(result, Err(VoteError::InvalidSelection { .. })));

        assert!(store.tallies().await.unwrap().values().all(|&votes| votes == 0));
        let alice = store.voter(&alice.id).await.unwrap().unwrap();
        assert_eq!(alice.status, VoterStatus::Eligible);
    }

    #[rocket::async_test]
    async fn unknown_voters_are_reported() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let ghost = Voter::example();
        let result = cast_vote(&store, &policy(5), &ghost.id, &fixture.ballot(), Utc::now).await;
        assert!(matches!(result, Err(VoteError::UnknownVoter(_))));
    }

    /// Window T0..T0+1h: A votes at T0+30m, A again at T0+31m, B at T0+61m.
    #[rocket::async_test]
    async fn votes_follow_the_election_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let at = |mins: i64| move || t0 + chrono::Duration::minutes(mins);

        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let settings = ElectionSettings::new(Some(t0), Some(t0 + chrono::Duration::hours(1)));
        store.set_settings(&settings.unwrap()).await.unwrap();
        let (a, b) = (Voter::example(), Voter::example2());
        store.insert_voter(&a).await.unwrap();
        store.insert_voter(&b).await.unwrap();

        let ballot = fixture.ballot();
        let receipt = cast_vote(&store, &policy(5), &a.id, &ballot, at(30)).await.unwrap();
        assert_eq!(receipt.cast_at, t0 + chrono::Duration::minutes(30));
        assert!(matches!(
            cast_vote(&store, &policy(5), &a.id, &ballot, at(31)).await,
            Err(VoteError::AlreadyVoted)
        ));
        assert!(matches!(
            cast_vote(&store, &policy(5), &b.id, &ballot, at(61)).await,
            Err(VoteError::VotingClosed(WindowState::Closed))
        ));

        let tallies = store.tallies().await.unwrap();
        assert_eq!(tallies[&fixture.ada], 1);
        assert_eq!(tallies[&fixture.linus], 1);
        let b = store.voter(&b.id).await.unwrap().unwrap();
        assert_eq!(b.status, VoterStatus::Eligible);
    }

    #[rocket::async_test]
    async fn concurrent_voters_lose_no_updates() {
        const N: usize = 8;

        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let voters = (0..N).map(voter).collect::<Vec<_>>();
        for voter in &voters {
            store.insert_voter(voter).await.unwrap();
        }

        // Every commit validates against the same tallies before any applies.
        store.interleave_commits(N);
        let ballot = fixture.ballot();
        let policy = policy(N as u32 + 2);
        let results = join_all(
            voters
                .iter()
                .map(|v| cast_vote(&store, &policy, &v.id, &ballot, Utc::now)),
        )
        .await;

        for result in &results {
            assert!(result.is_ok(), "{result:?}");
        }
        assert!(results.iter().any(|r| r.as_ref().unwrap().attempts > 1));
        let tallies = store.tallies().await.unwrap();
        assert_eq!(tallies[&fixture.ada], N as u64);
        assert_eq!(tallies[&fixture.linus], N as u64);
        assert_eq!(tallies[&fixture.grace], 0);
    }

    #[rocket::async_test]
    async fn duplicate_concurrent_requests_count_once() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let alice = Voter::example();
        store.insert_voter(&alice).await.unwrap();

        store.interleave_commits(2);
        let ballot = fixture.ballot();
        let policy = policy(5);
        let (first, second) = rocket::tokio::join!(
            cast_vote(&store, &policy, &alice.id, &ballot, Utc::now),
            cast_vote(&store, &policy, &alice.id, &ballot, Utc::now),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(VoteError::AlreadyVoted))));
        let tallies = store.tallies().await.unwrap();
        assert_eq!(tallies[&fixture.ada], 1);
        assert_eq!(tallies[&fixture.linus], 1);
    }

    #[rocket::async_test]
    async fn exhausted_retries_leave_no_trace() {
        let store = MemoryStore::new();
        let fixture = Fixture::seed(&store).await;
        let alice = Voter::example();
        store.insert_voter(&alice).await.unwrap();

        store.reject_commits(usize::MAX);
        let result = cast_vote(&store, &policy(3), &alice.id, &fixture.ballot(), Utc::now).await;
        assert!(matches!(result, Err(VoteError::VoteFailed { attempts: 3 })));

        assert!(store.tallies().await.unwrap().values().all(|&votes| votes == 0));
        let alice = store.voter(&alice.id).await.unwrap().unwrap();
        assert_eq!(alice.status, VoterStatus::Eligible);

        // Contention clears, and the same ballot goes through.
        store.reject_commits(0);
        let receipt = cast_vote(&store, &policy(3), &alice.id, &fixture.ballot(), Utc::now)
            .await
            .unwrap();
        assert_eq!(receipt.attempts, 1);
    }
}
