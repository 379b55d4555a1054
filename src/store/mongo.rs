use log::{debug, info, warn};
use mongodb::{
    bson::{doc, Document},
    error::Error as DbError,
    options::{
        Acknowledgment, FindOptions, ReadConcern, ReplaceOptions, TransactionOptions,
        WriteConcern,
    },
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;
use serde::de::DeserializeOwned;

use crate::model::{
    common::{CandidateId, LoginCode, PositionId, VoterId, VoterStatus},
    db::{
        Candidate, CandidateCore, ElectionSettings, NewCandidate, Position, Voter, SETTINGS_ID,
    },
    mongodb::{
        ensure_candidate_id_counter_exists, ensure_indexes_exist,
        errors::{is_duplicate_key_error, is_transient_transaction_error, is_unknown_commit_result},
        Coll, Counter, MongoCollection, CANDIDATE_ID_COUNTER,
    },
};
use crate::voting::AcceptedBallot;

use super::{BallotSnapshot, ElectionStore, StoreError, VoteTransaction, VoterUpdate};

/// How many times to retry a commit whose outcome is unknown.
const COMMIT_RETRIES: u32 = 3;

/// A MongoDB-backed store. Vote transactions need a replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect to the database, ensuring indexes and counters exist.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        ensure_candidate_id_counter_exists(&Coll::from_db(&db)).await?;
        info!("Using MongoDB database {db_name}");
        Ok(Self { client, db })
    }

    fn coll<T: MongoCollection>(&self) -> Coll<T> {
        Coll::from_db(&self.db)
    }

    async fn find_all<T>(&self) -> Result<Vec<T>, StoreError>
    where
        T: MongoCollection + DeserializeOwned + Unpin + Send + Sync,
    {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let items = self
            .coll::<T>()
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(items)
    }

    /// Start a transaction that sees one consistent snapshot of the database.
    async fn start_transaction(&self) -> Result<ClientSession, StoreError> {
        let mut session = self.client.start_session(None).await?;
        session
            .start_transaction(transaction_options())
            .await
            .map_err(classify)?;
        Ok(session)
    }

    /// Check that a position exists for a candidate to stand for, and write to
    /// it so that deleting it concurrently conflicts with this transaction.
    async fn claim_position(
        &self,
        id: &PositionId,
        session: &mut ClientSession,
    ) -> Result<(), StoreError> {
        let result = self
            .coll::<Position>()
            .update_one_with_session(
                doc! { "_id": id.clone() },
                doc! { "$inc": { "claims": 1_i64 } },
                None,
                session,
            )
            .await
            .map_err(classify)?;
        if result.matched_count == 1 {
            Ok(())
        } else {
            Err(StoreError::UnknownPosition(id.clone()))
        }
    }
}

fn transaction_options() -> TransactionOptions {
    TransactionOptions::builder()
        .read_concern(ReadConcern::snapshot())
        .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
        .build()
}

/// Commit a transaction, retrying while its outcome is unknown.
async fn commit_transaction(session: &mut ClientSession) -> Result<(), StoreError> {
    let mut retries = 0;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(e) if is_unknown_commit_result(&e) && retries < COMMIT_RETRIES => {
                retries += 1;
                warn!("Commit outcome unknown, retrying commit ({retries}/{COMMIT_RETRIES})");
            }
            Err(e) => return Err(classify(e)),
        }
    }
}

#[rocket::async_trait]
impl ElectionStore for MongoStore {
    async fn insert_voter(&self, voter: &Voter) -> Result<(), StoreError> {
        match self.coll::<Voter>().insert_one(voter, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                if self.voter(&voter.id).await?.is_some() {
                    Err(StoreError::Duplicate(format!("Voter {}", voter.id)))
                } else {
                    Err(StoreError::Duplicate("Login code".to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn voter(&self, id: &VoterId) -> Result<Option<Voter>, StoreError> {
        let voter = self
            .coll::<Voter>()
            .find_one(doc! { "_id": id.clone() }, None)
            .await?;
        Ok(voter)
    }

    async fn voter_by_code(&self, code: &LoginCode) -> Result<Option<Voter>, StoreError> {
        let voter = self
            .coll::<Voter>()
            .find_one(doc! { "login_code": code.clone() }, None)
            .await?;
        Ok(voter)
    }

    async fn voters(&self) -> Result<Vec<Voter>, StoreError> {
        self.find_all().await
    }

    async fn update_voter(&self, id: &VoterId, update: &VoterUpdate) -> Result<bool, StoreError> {
        let filter = doc! {
            "_id": id.clone(),
            "status": update.expected_status,
        };
        let changes = doc! {
            "$set": {
                "name": update.name.as_str(),
                "status": update.status,
            }
        };
        let result = self.coll::<Voter>().update_one(filter, changes, None).await?;
        if result.matched_count == 1 {
            Ok(true)
        } else if self.voter(id).await?.is_some() {
            Err(StoreError::Conflict)
        } else {
            Ok(false)
        }
    }

    async fn delete_voter(&self, id: &VoterId) -> Result<bool, StoreError> {
        let result = self
            .coll::<Voter>()
            .delete_one(doc! { "_id": id.clone() }, None)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        match self.coll::<Position>().insert_one(position, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                Err(StoreError::Duplicate(format!("Position {}", position.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn positions(&self) -> Result<Vec<Position>, StoreError> {
        self.find_all().await
    }

    async fn rename_position(&self, id: &PositionId, title: &str) -> Result<bool, StoreError> {
        let result = self
            .coll::<Position>()
            .update_one(
                doc! { "_id": id.clone() },
                doc! { "$set": { "title": title } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn delete_position(&self, id: &PositionId) -> Result<bool, StoreError> {
        let mut session = self.start_transaction().await?;
        let standing = self
            .coll::<Candidate>()
            .count_documents_with_session(doc! { "position": id.clone() }, None, &mut session)
            .await
            .map_err(classify)?;
        if standing > 0 {
            return Err(StoreError::PositionInUse(id.clone()));
        }
        let result = self
            .coll::<Position>()
            .delete_one_with_session(doc! { "_id": id.clone() }, None, &mut session)
            .await
            .map_err(classify)?;
        commit_transaction(&mut session).await?;
        Ok(result.deleted_count == 1)
    }

    async fn insert_candidate(&self, candidate: &NewCandidate) -> Result<Candidate, StoreError> {
        // IDs skipped by failed inserts are never reused.
        let id = Counter::next(&self.coll(), CANDIDATE_ID_COUNTER)
            .await?
            .ok_or_else(|| StoreError::Corrupt("candidate ID counter is missing".to_string()))?;
        let candidate = Candidate::new(CandidateId(id), candidate.clone());

        let mut session = self.start_transaction().await?;
        self.claim_position(&candidate.position, &mut session).await?;
        self.coll::<Candidate>()
            .insert_one_with_session(&candidate, None, &mut session)
            .await
            .map_err(classify)?;
        commit_transaction(&mut session).await?;
        Ok(candidate)
    }

    async fn candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        self.find_all().await
    }

    async fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, StoreError> {
        let candidate = self
            .coll::<Candidate>()
            .find_one(doc! { "_id": id }, None)
            .await?;
        Ok(candidate)
    }

    async fn update_candidate(
        &self,
        id: CandidateId,
        candidate: &CandidateCore,
    ) -> Result<bool, StoreError> {
        let mut session = self.start_transaction().await?;
        self.claim_position(&candidate.position, &mut session).await?;
        let changes = doc! {
            "$set": {
                "name": candidate.name.as_str(),
                "position": candidate.position.clone(),
                "bio": candidate.bio.as_str(),
                "platform": candidate.platform.as_str(),
                "image_url": candidate.image_url.as_str(),
            }
        };
        let result = self
            .coll::<Candidate>()
            .update_one_with_session(doc! { "_id": id }, changes, None, &mut session)
            .await
            .map_err(classify)?;
        commit_transaction(&mut session).await?;
        Ok(result.matched_count == 1)
    }

    async fn delete_candidate(&self, id: CandidateId) -> Result<bool, StoreError> {
        let result = self
            .coll::<Candidate>()
            .delete_one(doc! { "_id": id }, None)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn settings(&self) -> Result<ElectionSettings, StoreError> {
        let settings = self
            .coll::<ElectionSettings>()
            .find_one(doc! { "_id": SETTINGS_ID }, None)
            .await?;
        Ok(settings.unwrap_or_default())
    }

    async fn set_settings(&self, settings: &ElectionSettings) -> Result<(), StoreError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.coll::<ElectionSettings>()
            .replace_one(doc! { "_id": SETTINGS_ID }, settings, options)
            .await?;
        Ok(())
    }

    async fn begin_vote(&self) -> Result<Box<dyn VoteTransaction>, StoreError> {
        let session = self.start_transaction().await?;
        Ok(Box::new(MongoVote {
            session,
            store: self.clone(),
        }))
    }
}

/// Sort transaction errors into retryable conflicts and real failures.
fn classify(err: DbError) -> StoreError {
    if is_transient_transaction_error(&err) {
        debug!("Transient transaction error: {err}");
        StoreError::Conflict
    } else {
        StoreError::Db(err)
    }
}

/// A vote transaction in a MongoDB client session. Dropping the session
/// aborts the transaction if it has not been committed.
struct MongoVote {
    session: ClientSession,
    store: MongoStore,
}

impl MongoVote {
    async fn find_all<T>(&mut self) -> Result<Vec<T>, StoreError>
    where
        T: MongoCollection + DeserializeOwned + Unpin + Send + Sync,
    {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let mut cursor = self
            .store
            .coll::<T>()
            .find_with_session(None, options, &mut self.session)
            .await
            .map_err(classify)?;
        let mut items = Vec::new();
        while let Some(item) = cursor.next(&mut self.session).await {
            items.push(item.map_err(classify)?);
        }
        Ok(items)
    }

    /// Apply a guarded update, failing with a conflict if the guard no longer holds.
    async fn guarded_update<T: MongoCollection>(
        &mut self,
        filter: Document,
        update: Document,
    ) -> Result<(), StoreError> {
        let result = self
            .store
            .coll::<T>()
            .update_one_with_session(filter, update, None, &mut self.session)
            .await
            .map_err(classify)?;
        if result.modified_count == 1 {
            Ok(())
        } else {
            Err(StoreError::Conflict)
        }
    }
}

#[rocket::async_trait]
impl VoteTransaction for MongoVote {
    async fn snapshot(&mut self, voter: &VoterId) -> Result<Option<BallotSnapshot>, StoreError> {
        let voter = self
            .store
            .coll::<Voter>()
            .find_one_with_session(doc! { "_id": voter.clone() }, None, &mut self.session)
            .await
            .map_err(classify)?;
        let Some(voter) = voter else {
            return Ok(None);
        };
        let settings = self
            .store
            .coll::<ElectionSettings>()
            .find_one_with_session(doc! { "_id": SETTINGS_ID }, None, &mut self.session)
            .await
            .map_err(classify)?
            .unwrap_or_default();
        let positions = self.find_all::<Position>().await?;
        let candidates = self.find_all::<Candidate>().await?;
        Ok(Some(BallotSnapshot {
            voter,
            settings,
            positions,
            candidates,
        }))
    }

    async fn commit(&mut self, ballot: &AcceptedBallot) -> Result<(), StoreError> {
        self.guarded_update::<Voter>(
            doc! { "_id": ballot.voter_id.clone(), "status": VoterStatus::Eligible },
            doc! { "$set": { "status": VoterStatus::Voted } },
        )
        .await?;
        for pick in &ballot.picks {
            let votes_read = i64::try_from(pick.votes_read)
                .map_err(|_| StoreError::Corrupt(format!("tally of {} overflowed", pick.candidate_id)))?;
            self.guarded_update::<Candidate>(
                doc! {
                    "_id": pick.candidate_id,
                    "position": pick.position_id.clone(),
                    "votes": votes_read,
                },
                doc! { "$inc": { "votes": 1_i64 } },
            )
            .await?;
        }

        commit_transaction(&mut self.session).await
    }
}

/// These run against a live MongoDB replica set at `ROCKET_DB_URI`, each in
/// a database of its own that is dropped afterwards.
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rand::Rng;
    use rocket::futures::future::join_all;

    use super::*;
    use crate::store::fixtures::Fixture;
    use crate::voting::{cast_vote, EmptyPositionRule, VoteError, VotePolicy};

    async fn store() -> MongoStore {
        let uri = std::env::var("ROCKET_DB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
        let db_name = format!("election_test_{:08x}", rand::thread_rng().gen::<u32>());
        MongoStore::connect(&uri, &db_name).await.unwrap()
    }

    async fn cleanup(store: MongoStore) {
        store.db.drop(None).await.unwrap();
    }

    fn policy(max_attempts: u32) -> VotePolicy {
        VotePolicy::new(max_attempts, Duration::from_millis(5), EmptyPositionRule::Exempt)
    }

    fn voter(n: usize) -> Voter {
        Voter::new(format!("voter{n}@uni.edu").parse().unwrap(), format!("Voter {n}"))
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at ROCKET_DB_URI"]
    async fn vote_applies_every_increment_and_the_status_change() {
        let store = store().await;
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
        let stored = store.voter(&alice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VoterStatus::Voted);

        let second = cast_vote(&store, &policy(5), &alice.id, &fixture.ballot(), Utc::now).await;
        assert!(matches!(second, Err(VoteError::AlreadyVoted)));
        assert_eq!(store.tallies().await.unwrap(), tallies);

        cleanup(store).await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at ROCKET_DB_URI"]
    async fn stale_tally_conflicts_without_partial_write() {
        let store = store().await;
        let fixture = Fixture::seed(&store).await;
        let (alice, bob) = (Voter::example(), Voter::example2());
        store.insert_voter(&alice).await.unwrap();
        store.insert_voter(&bob).await.unwrap();

        let mut txn = store.begin_vote().await.unwrap();
        let snapshot = txn.snapshot(&alice.id).await.unwrap().unwrap();
        cast_vote(&store, &policy(5), &bob.id, &fixture.ballot(), Utc::now)
            .await
            .unwrap();

        let ballot = fixture.ballot_for(&snapshot, &[fixture.ada, fixture.linus]);
        assert!(matches!(txn.commit(&ballot).await, Err(StoreError::Conflict)));
        drop(txn);

        let tallies = store.tallies().await.unwrap();
        assert_eq!(tallies[&fixture.ada], 1);
        assert_eq!(tallies[&fixture.linus], 1);
        let stored = store.voter(&alice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VoterStatus::Eligible);

        cleanup(store).await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at ROCKET_DB_URI"]
    async fn concurrent_voters_lose_no_updates() {
        const N: usize = 6;

        let store = store().await;
        let fixture = Fixture::seed(&store).await;
        let voters = (0..N).map(voter).collect::<Vec<_>>();
        for voter in &voters {
            store.insert_voter(voter).await.unwrap();
        }

        let ballot = fixture.ballot();
        let policy = policy(40);
        let results = join_all(
            voters
                .iter()
                .map(|v| cast_vote(&store, &policy, &v.id, &ballot, Utc::now)),
        )
        .await;

        for result in &results {
            assert!(result.is_ok(), "{result:?}");
        }
        let tallies = store.tallies().await.unwrap();
        assert_eq!(tallies[&fixture.ada], N as u64);
        assert_eq!(tallies[&fixture.linus], N as u64);
        assert_eq!(tallies[&fixture.grace], 0);
        for voter in &voters {
            let stored = store.voter(&voter.id).await.unwrap().unwrap();
            assert_eq!(stored.status, VoterStatus::Voted);
        }

        cleanup(store).await;
    }

    #[rocket::async_test]
    #[ignore = "needs a MongoDB replica set at ROCKET_DB_URI"]
    async fn candidates_only_stand_for_live_positions() {
        let store = store().await;
        let fixture = Fixture::seed(&store).await;

        assert!(matches!(
            store.delete_position(&fixture.president).await,
            Err(StoreError::PositionInUse(_))
        ));
        let stray = CandidateCore::new("Nobody", PositionId::from_title("Mascot").unwrap());
        assert!(matches!(
            store.insert_candidate(&stray).await,
            Err(StoreError::UnknownPosition(_))
        ));
        assert!(matches!(
            store.update_candidate(fixture.ada, &stray).await,
            Err(StoreError::UnknownPosition(_))
        ));

        // Race a candidate insert against deleting the position it names.
        store.delete_candidate(fixture.linus).await.unwrap();
        let newcomer = CandidateCore::new("Margaret Hamilton", fixture.treasurer.clone());
        let (deleted, inserted) = rocket::tokio::join!(
            store.delete_position(&fixture.treasurer),
            store.insert_candidate(&newcomer),
        );
        let position_alive = store
            .positions()
            .await
            .unwrap()
            .iter()
            .any(|p| p.id == fixture.treasurer);
        let standing = store
            .candidates()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.position == fixture.treasurer)
            .count();
        assert!(position_alive || standing == 0, "{deleted:?} {inserted:?}");
        assert_eq!(inserted.is_ok(), standing == 1);

        cleanup(store).await;
    }
}
