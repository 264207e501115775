use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    ClientSession, Client, Collection, Database, IndexModel,
    bson::{Bson, DateTime, Document, doc},
    error::Error as MongoError,
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoBattleDocument, MongoParticipantDocument, MongoRoundDocument,
        MongoSubmissionDocument, MongoVoteDocument, artifact_document, bson_uuid, doc_id,
        uuid_list,
    },
};
use crate::{
    dao::{
        battle_store::BattleStore,
        models::{
            Advancement, ArtifactEntity, BattleEntity, JoinOutcome, ParticipantEntity,
            RoundCompletion, RoundEntity, RoundScheduleUpdate, SubmissionEntity,
            SubmissionWrite, VoteEntity, VoteWrite,
        },
        storage::StorageResult,
    },
    state::round_machine::{RoundPhase, TransitionPlan},
};

const BATTLES: &str = "battles";
const ROUNDS: &str = "rounds";
const PARTICIPANTS: &str = "participants";
const SUBMISSIONS: &str = "submissions";
const VOTES: &str = "votes";

const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// MongoDB-backed [`BattleStore`]. Guarded writes run inside multi-document
/// transactions, so the deployment must be a replica set.
#[derive(Clone)]
pub struct MongoBattleStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

#[derive(Clone)]
struct Collections {
    battles: Collection<MongoBattleDocument>,
    rounds: Collection<MongoRoundDocument>,
    participants: Collection<MongoParticipantDocument>,
    submissions: Collection<MongoSubmissionDocument>,
    votes: Collection<MongoVoteDocument>,
}

/// How a transaction body wants its transaction to end.
enum TxnOutcome<T> {
    Commit(T),
    Abort(T),
}

fn read_err(collection: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Query { collection, source }
}

fn write_err(collection: &'static str) -> impl FnOnce(MongoError) -> MongoDaoError {
    move |source| MongoDaoError::Write { collection, source }
}

fn version(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn participant_filter(battle_id: Uuid, user_id: Uuid) -> Document {
    doc! {"battle_id": bson_uuid(battle_id), "user_id": bson_uuid(user_id)}
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = self.config.open().await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

/// Bump the round version if it is still in `phase`; the write also makes
/// concurrent transactions on the same round conflict.
async fn bump_round_in_phase(
    rounds: &Collection<MongoRoundDocument>,
    session: &mut ClientSession,
    round_id: Uuid,
    phase: RoundPhase,
) -> MongoResult<bool> {
    let result = rounds
        .update_one(
            doc! {"_id": bson_uuid(round_id), "phase": phase.as_str()},
            doc! {"$inc": {"version": 1_i64}},
        )
        .session(&mut *session)
        .await
        .map_err(write_err(ROUNDS))?;
    Ok(result.matched_count > 0)
}

/// Compare-and-set a transition plan, merging `extra` into the `$set` stage.
async fn apply_plan(
    collections: &Collections,
    session: &mut ClientSession,
    plan: &TransitionPlan,
    extra: Document,
    now: SystemTime,
) -> MongoResult<bool> {
    let updated_at = DateTime::from_system_time(now);
    let mut set = doc! {
        "phase": plan.to.as_str(),
        "version": version(plan.version_next),
        "updated_at": updated_at,
    };
    set.extend(extra);

    let updated = collections
        .rounds
        .find_one_and_update(
            doc! {
                "_id": bson_uuid(plan.round_id),
                "phase": plan.from.as_str(),
                "version": version(plan.version),
            },
            doc! {"$set": set},
        )
        .return_document(ReturnDocument::After)
        .session(&mut *session)
        .await
        .map_err(write_err(ROUNDS))?;

    let Some(round) = updated else {
        return Ok(false);
    };

    if plan.to == RoundPhase::Submission {
        collections
            .battles
            .update_one(
                doc_id(round.battle_id()),
                doc! {"$set": {
                    "current_round_id": bson_uuid(plan.round_id),
                    "updated_at": updated_at,
                }},
            )
            .session(&mut *session)
            .await
            .map_err(write_err(BATTLES))?;
    }

    Ok(true)
}

async fn create_index(
    database: &Database,
    collection: &'static str,
    index: &'static str,
    keys: Document,
    unique: bool,
) -> MongoResult<()> {
    let model = IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(Some(index.to_owned()))
                .unique(Some(unique))
                .build(),
        )
        .build();

    database
        .collection::<Document>(collection)
        .create_index(model)
        .await
        .map_err(|source| MongoDaoError::EnsureIndex {
            collection,
            index,
            source,
        })?;
    Ok(())
}

impl MongoBattleStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = config.open().await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        create_index(
            &database,
            ROUNDS,
            "round_ordinal_idx",
            doc! {"battle_id": 1, "ordinal": 1},
            true,
        )
        .await?;
        create_index(&database, ROUNDS, "round_phase_idx", doc! {"phase": 1}, false).await?;
        create_index(
            &database,
            PARTICIPANTS,
            "participant_member_idx",
            doc! {"battle_id": 1, "user_id": 1},
            true,
        )
        .await?;
        create_index(
            &database,
            SUBMISSIONS,
            "submission_content_idx",
            doc! {"round_id": 1, "content_key": 1},
            true,
        )
        .await?;
        create_index(
            &database,
            SUBMISSIONS,
            "submission_order_idx",
            doc! {"round_id": 1, "submitter_id": 1, "order": 1},
            true,
        )
        .await?;
        create_index(
            &database,
            VOTES,
            "vote_slot_idx",
            doc! {"round_id": 1, "voter_id": 1, "slot": 1},
            true,
        )
        .await?;
        create_index(
            &database,
            VOTES,
            "vote_submission_idx",
            doc! {"submission_id": 1},
            false,
        )
        .await?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn collections(&self) -> Collections {
        let guard = self.inner.state.read().await;
        let database = &guard.database;
        Collections {
            battles: database.collection(BATTLES),
            rounds: database.collection(ROUNDS),
            participants: database.collection(PARTICIPANTS),
            submissions: database.collection(SUBMISSIONS),
            votes: database.collection(VOTES),
        }
    }

    /// Run `body` inside a transaction, retrying the whole attempt on transient
    /// transaction errors.
    async fn run_transaction<T, F>(&self, operation: &'static str, mut body: F) -> MongoResult<T>
    where
        T: Send,
        F: for<'s> FnMut(&'s mut ClientSession) -> BoxFuture<'s, MongoResult<TxnOutcome<T>>>
            + Send,
    {
        let client = self.client().await;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut session = client
                .start_session()
                .await
                .map_err(|source| MongoDaoError::Transaction { operation, source })?;
            session
                .start_transaction()
                .await
                .map_err(|source| MongoDaoError::Transaction { operation, source })?;

            let result = match body(&mut session).await {
                Ok(TxnOutcome::Commit(value)) => session
                    .commit_transaction()
                    .await
                    .map(|_| value)
                    .map_err(|source| MongoDaoError::Transaction { operation, source }),
                Ok(TxnOutcome::Abort(value)) => {
                    if let Err(err) = session.abort_transaction().await {
                        debug!(operation, error = %err, "abort after rejected write failed");
                    }
                    Ok(value)
                }
                Err(err) => {
                    if let Err(abort_err) = session.abort_transaction().await {
                        debug!(operation, error = %abort_err, "abort after failed write failed");
                    }
                    Err(err)
                }
            };

            match result {
                Err(err) if err.is_transient() && attempt < MAX_TRANSACTION_ATTEMPTS => {
                    warn!(operation, attempt, error = %err, "transient transaction error; retrying");
                }
                other => return other,
            }
        }
    }

    async fn create_battle(
        &self,
        battle: BattleEntity,
        first_round: RoundEntity,
        creator: ParticipantEntity,
    ) -> MongoResult<()> {
        let collections = self.collections().await;
        let battle = MongoBattleDocument::from(battle);
        let round = MongoRoundDocument::from(first_round);
        let creator = MongoParticipantDocument::from(creator);

        self.run_transaction("create_battle", |session| {
            let collections = collections.clone();
            let (battle, round, creator) = (battle.clone(), round.clone(), creator.clone());
            Box::pin(async move {
                collections
                    .battles
                    .insert_one(&battle)
                    .session(&mut *session)
                    .await
                    .map_err(write_err(BATTLES))?;
                collections
                    .rounds
                    .insert_one(&round)
                    .session(&mut *session)
                    .await
                    .map_err(write_err(ROUNDS))?;
                collections
                    .participants
                    .insert_one(&creator)
                    .session(&mut *session)
                    .await
                    .map_err(write_err(PARTICIPANTS))?;
                Ok(TxnOutcome::Commit(()))
            })
        })
        .await
    }

    async fn find_battle(&self, id: Uuid) -> MongoResult<Option<BattleEntity>> {
        let collections = self.collections().await;
        let document = collections
            .battles
            .find_one(doc_id(id))
            .await
            .map_err(read_err(BATTLES))?;
        Ok(document.map(Into::into))
    }

    async fn list_battles(&self) -> MongoResult<Vec<BattleEntity>> {
        let collections = self.collections().await;
        let documents: Vec<MongoBattleDocument> = collections
            .battles
            .find(doc! {})
            .sort(doc! {"created_at": 1})
            .await
            .map_err(read_err(BATTLES))?
            .try_collect()
            .await
            .map_err(read_err(BATTLES))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn insert_round(&self, round: RoundEntity) -> MongoResult<bool> {
        let collections = self.collections().await;
        let battle_id = round.battle_id;
        let touched_at = DateTime::from_system_time(round.created_at);
        let round = MongoRoundDocument::from(round);

        let outcome = self
            .run_transaction("insert_round", |session| {
                let collections = collections.clone();
                let round = round.clone();
                Box::pin(async move {
                    let battle = collections
                        .battles
                        .update_one(
                            doc! {"_id": bson_uuid(battle_id), "status": "active"},
                            doc! {"$set": {"updated_at": touched_at}},
                        )
                        .session(&mut *session)
                        .await
                        .map_err(write_err(BATTLES))?;
                    if battle.matched_count == 0 {
                        return Ok(TxnOutcome::Abort(false));
                    }
                    collections
                        .rounds
                        .insert_one(&round)
                        .session(&mut *session)
                        .await
                        .map_err(write_err(ROUNDS))?;
                    Ok(TxnOutcome::Commit(true))
                })
            })
            .await;

        match outcome {
            Err(err) if err.is_duplicate_key() => Ok(false),
            other => other,
        }
    }

    async fn update_round_schedule(
        &self,
        round_id: Uuid,
        update: RoundScheduleUpdate,
    ) -> MongoResult<Option<RoundEntity>> {
        let collections = self.collections().await;
        let document = collections
            .rounds
            .find_one_and_update(
                doc! {
                    "_id": bson_uuid(round_id),
                    "phase": {"$in": [RoundPhase::Pending.as_str(), RoundPhase::Submission.as_str()]},
                },
                doc! {
                    "$set": {
                        "theme": update.theme,
                        "description": update.description,
                        "submission_deadline": DateTime::from_system_time(update.submission_deadline),
                        "voting_deadline": DateTime::from_system_time(update.voting_deadline),
                        "updated_at": DateTime::from_system_time(update.updated_at),
                    },
                    "$inc": {"version": 1_i64},
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(write_err(ROUNDS))?;
        Ok(document.map(Into::into))
    }

    async fn find_round(&self, id: Uuid) -> MongoResult<Option<RoundEntity>> {
        let collections = self.collections().await;
        let document = collections
            .rounds
            .find_one(doc_id(id))
            .await
            .map_err(read_err(ROUNDS))?;
        Ok(document.map(Into::into))
    }

    async fn find_round_by_ordinal(
        &self,
        battle_id: Uuid,
        ordinal: u32,
    ) -> MongoResult<Option<RoundEntity>> {
        let collections = self.collections().await;
        let document = collections
            .rounds
            .find_one(doc! {"battle_id": bson_uuid(battle_id), "ordinal": i64::from(ordinal)})
            .await
            .map_err(read_err(ROUNDS))?;
        Ok(document.map(Into::into))
    }

    async fn find_rounds(&self, filter: Document) -> MongoResult<Vec<RoundEntity>> {
        let collections = self.collections().await;
        let documents: Vec<MongoRoundDocument> = collections
            .rounds
            .find(filter)
            .sort(doc! {"ordinal": 1})
            .await
            .map_err(read_err(ROUNDS))?
            .try_collect()
            .await
            .map_err(read_err(ROUNDS))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn apply_round_transition(&self, plan: TransitionPlan) -> MongoResult<bool> {
        let collections = self.collections().await;
        self.run_transaction("apply_round_transition", |session| {
            let collections = collections.clone();
            let plan = plan.clone();
            Box::pin(async move {
                let applied =
                    apply_plan(&collections, session, &plan, Document::new(), SystemTime::now())
                        .await?;
                Ok(if applied {
                    TxnOutcome::Commit(true)
                } else {
                    TxnOutcome::Abort(false)
                })
            })
        })
        .await
    }

    async fn commit_round_completion(&self, completion: RoundCompletion) -> MongoResult<bool> {
        let collections = self.collections().await;
        self.run_transaction("commit_round_completion", |session| {
            let collections = collections.clone();
            let completion = completion.clone();
            Box::pin(async move {
                let now = completion.completed_at;
                let completed_at = DateTime::from_system_time(now);
                let extra = doc! {
                    "winner_ids": uuid_list(&completion.winner_ids),
                    "completed_at": completed_at,
                };
                if !apply_plan(&collections, session, &completion.plan, extra, now).await? {
                    return Ok(TxnOutcome::Abort(false));
                }

                for (user_id, credits) in &completion.credits {
                    collections
                        .participants
                        .update_one(
                            participant_filter(completion.battle_id, *user_id),
                            doc! {"$inc": {"total_credits": i64::from(*credits)}},
                        )
                        .session(&mut *session)
                        .await
                        .map_err(write_err(PARTICIPANTS))?;
                }
                if !completion.winner_ids.is_empty() {
                    collections
                        .participants
                        .update_many(
                            doc! {
                                "battle_id": bson_uuid(completion.battle_id),
                                "user_id": {"$in": uuid_list(&completion.winner_ids)},
                            },
                            doc! {"$inc": {"rounds_won": 1_i64}},
                        )
                        .session(&mut *session)
                        .await
                        .map_err(write_err(PARTICIPANTS))?;
                }

                match &completion.advancement {
                    Advancement::Activate(next) => {
                        if !apply_plan(&collections, session, next, Document::new(), now).await? {
                            return Ok(TxnOutcome::Abort(false));
                        }
                    }
                    Advancement::FinishBattle { champion_ids } => {
                        let appended = collections
                            .rounds
                            .count_documents(doc! {
                                "battle_id": bson_uuid(completion.battle_id),
                                "ordinal": i64::from(completion.ordinal) + 1,
                            })
                            .session(&mut *session)
                            .await
                            .map_err(read_err(ROUNDS))?;
                        if appended > 0 {
                            return Ok(TxnOutcome::Abort(false));
                        }

                        let finished = collections
                            .battles
                            .update_one(
                                doc! {"_id": bson_uuid(completion.battle_id), "status": "active"},
                                doc! {"$set": {
                                    "status": "completed",
                                    "current_round_id": Bson::Null,
                                    "champion_ids": uuid_list(champion_ids),
                                    "updated_at": completed_at,
                                }},
                            )
                            .session(&mut *session)
                            .await
                            .map_err(write_err(BATTLES))?;
                        if finished.matched_count == 0 {
                            return Ok(TxnOutcome::Abort(false));
                        }
                    }
                }

                Ok(TxnOutcome::Commit(true))
            })
        })
        .await
    }

    async fn set_round_artifact(&self, round_id: Uuid, artifact: ArtifactEntity) -> MongoResult<bool> {
        let collections = self.collections().await;
        let result = collections
            .rounds
            .update_one(
                doc! {"_id": bson_uuid(round_id), "artifact.status": {"$ne": "ready"}},
                doc! {"$set": {"artifact": artifact_document(&artifact)}},
            )
            .await
            .map_err(write_err(ROUNDS))?;
        Ok(result.matched_count > 0)
    }

    async fn join_battle(&self, participant: ParticipantEntity) -> MongoResult<JoinOutcome> {
        let collections = self.collections().await;
        let (battle_id, user_id) = (participant.battle_id, participant.user_id);
        let document = MongoParticipantDocument::from(participant);

        let outcome = self
            .run_transaction("join_battle", |session| {
                let collections = collections.clone();
                let document = document.clone();
                Box::pin(async move {
                    let existing = collections
                        .participants
                        .find_one(participant_filter(battle_id, user_id))
                        .session(&mut *session)
                        .await
                        .map_err(read_err(PARTICIPANTS))?;
                    if existing.is_some() {
                        return Ok(TxnOutcome::Abort(JoinOutcome::AlreadyMember));
                    }

                    let seat = collections
                        .battles
                        .update_one(
                            doc! {
                                "_id": bson_uuid(battle_id),
                                "status": "active",
                                "$expr": {"$lt": ["$participant_count", "$capacity"]},
                            },
                            doc! {"$inc": {"participant_count": 1_i64}},
                        )
                        .session(&mut *session)
                        .await
                        .map_err(write_err(BATTLES))?;
                    if seat.matched_count == 0 {
                        let active = collections
                            .battles
                            .count_documents(doc! {"_id": bson_uuid(battle_id), "status": "active"})
                            .session(&mut *session)
                            .await
                            .map_err(read_err(BATTLES))?;
                        let outcome = if active > 0 {
                            JoinOutcome::Full
                        } else {
                            JoinOutcome::BattleClosed
                        };
                        return Ok(TxnOutcome::Abort(outcome));
                    }

                    collections
                        .participants
                        .insert_one(&document)
                        .session(&mut *session)
                        .await
                        .map_err(write_err(PARTICIPANTS))?;
                    Ok(TxnOutcome::Commit(JoinOutcome::Joined))
                })
            })
            .await;

        match outcome {
            Err(err) if err.is_duplicate_key() => Ok(JoinOutcome::AlreadyMember),
            other => other,
        }
    }

    async fn find_participant(
        &self,
        battle_id: Uuid,
        user_id: Uuid,
    ) -> MongoResult<Option<ParticipantEntity>> {
        let collections = self.collections().await;
        let document = collections
            .participants
            .find_one(participant_filter(battle_id, user_id))
            .await
            .map_err(read_err(PARTICIPANTS))?;
        Ok(document.map(Into::into))
    }

    async fn list_participants(&self, battle_id: Uuid) -> MongoResult<Vec<ParticipantEntity>> {
        let collections = self.collections().await;
        let documents: Vec<MongoParticipantDocument> = collections
            .participants
            .find(doc! {"battle_id": bson_uuid(battle_id)})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(read_err(PARTICIPANTS))?
            .try_collect()
            .await
            .map_err(read_err(PARTICIPANTS))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    /// Resolve a unique index rejection into the matching submission outcome.
    async fn submission_conflict(
        &self,
        round_id: Uuid,
        content_key: &str,
    ) -> MongoResult<SubmissionWrite> {
        let collections = self.collections().await;
        let existing = collections
            .submissions
            .find_one(doc! {"round_id": bson_uuid(round_id), "content_key": content_key})
            .await
            .map_err(read_err(SUBMISSIONS))?;
        Ok(match existing {
            Some(existing) => SubmissionWrite::DuplicateContent {
                submitter_id: existing.submitter_id(),
            },
            None => SubmissionWrite::OrderTaken,
        })
    }

    async fn insert_submission(&self, submission: SubmissionEntity) -> MongoResult<SubmissionWrite> {
        let collections = self.collections().await;
        let round_id = submission.round_id;
        let content_key = submission.content_key.clone();
        let document = MongoSubmissionDocument::from(submission.clone());

        let outcome = self
            .run_transaction("insert_submission", |session| {
                let collections = collections.clone();
                let document = document.clone();
                let submission = submission.clone();
                Box::pin(async move {
                    if !bump_round_in_phase(
                        &collections.rounds,
                        session,
                        round_id,
                        RoundPhase::Submission,
                    )
                    .await?
                    {
                        return Ok(TxnOutcome::Abort(SubmissionWrite::RoundClosed));
                    }

                    let duplicate = collections
                        .submissions
                        .find_one(doc! {
                            "round_id": bson_uuid(round_id),
                            "content_key": submission.content_key.as_str(),
                        })
                        .session(&mut *session)
                        .await
                        .map_err(read_err(SUBMISSIONS))?;
                    if let Some(existing) = duplicate {
                        return Ok(TxnOutcome::Abort(SubmissionWrite::DuplicateContent {
                            submitter_id: existing.submitter_id(),
                        }));
                    }

                    let order_taken = collections
                        .submissions
                        .count_documents(doc! {
                            "round_id": bson_uuid(round_id),
                            "submitter_id": bson_uuid(submission.submitter_id),
                            "order": i32::from(submission.order),
                        })
                        .session(&mut *session)
                        .await
                        .map_err(read_err(SUBMISSIONS))?;
                    if order_taken > 0 {
                        return Ok(TxnOutcome::Abort(SubmissionWrite::OrderTaken));
                    }

                    collections
                        .submissions
                        .insert_one(&document)
                        .session(&mut *session)
                        .await
                        .map_err(write_err(SUBMISSIONS))?;
                    Ok(TxnOutcome::Commit(SubmissionWrite::Applied))
                })
            })
            .await;

        match outcome {
            Err(err) if err.is_duplicate_key() => {
                self.submission_conflict(round_id, &content_key).await
            }
            other => other,
        }
    }

    async fn replace_submission_content(
        &self,
        submission_id: Uuid,
        content_ref: String,
        content_key: String,
    ) -> MongoResult<SubmissionWrite> {
        let collections = self.collections().await;
        let Some(current) = collections
            .submissions
            .find_one(doc_id(submission_id))
            .await
            .map_err(read_err(SUBMISSIONS))?
        else {
            return Ok(SubmissionWrite::NotFound);
        };
        let round_id = current.round_id();

        let outcome = self
            .run_transaction("replace_submission_content", |session| {
                let collections = collections.clone();
                let (content_ref, content_key) = (content_ref.clone(), content_key.clone());
                Box::pin(async move {
                    if !bump_round_in_phase(
                        &collections.rounds,
                        session,
                        round_id,
                        RoundPhase::Submission,
                    )
                    .await?
                    {
                        return Ok(TxnOutcome::Abort(SubmissionWrite::RoundClosed));
                    }

                    let duplicate = collections
                        .submissions
                        .find_one(doc! {
                            "round_id": bson_uuid(round_id),
                            "content_key": content_key.as_str(),
                            "_id": {"$ne": bson_uuid(submission_id)},
                        })
                        .session(&mut *session)
                        .await
                        .map_err(read_err(SUBMISSIONS))?;
                    if let Some(existing) = duplicate {
                        return Ok(TxnOutcome::Abort(SubmissionWrite::DuplicateContent {
                            submitter_id: existing.submitter_id(),
                        }));
                    }

                    let result = collections
                        .submissions
                        .update_one(
                            doc_id(submission_id),
                            doc! {"$set": {"content_ref": content_ref, "content_key": content_key}},
                        )
                        .session(&mut *session)
                        .await
                        .map_err(write_err(SUBMISSIONS))?;
                    if result.matched_count == 0 {
                        return Ok(TxnOutcome::Abort(SubmissionWrite::NotFound));
                    }
                    Ok(TxnOutcome::Commit(SubmissionWrite::Applied))
                })
            })
            .await;

        match outcome {
            Err(err) if err.is_duplicate_key() => {
                self.submission_conflict(round_id, &content_key).await
            }
            other => other,
        }
    }

    async fn delete_submission(&self, submission_id: Uuid) -> MongoResult<SubmissionWrite> {
        let collections = self.collections().await;
        self.run_transaction("delete_submission", |session| {
            let collections = collections.clone();
            Box::pin(async move {
                let Some(existing) = collections
                    .submissions
                    .find_one(doc_id(submission_id))
                    .session(&mut *session)
                    .await
                    .map_err(read_err(SUBMISSIONS))?
                else {
                    return Ok(TxnOutcome::Abort(SubmissionWrite::NotFound));
                };
                let round_id = existing.round_id();

                if !bump_round_in_phase(&collections.rounds, session, round_id, RoundPhase::Submission)
                    .await?
                {
                    return Ok(TxnOutcome::Abort(SubmissionWrite::RoundClosed));
                }

                collections
                    .submissions
                    .delete_one(doc_id(submission_id))
                    .session(&mut *session)
                    .await
                    .map_err(write_err(SUBMISSIONS))?;

                if existing.order() == 1 {
                    collections
                        .submissions
                        .update_one(
                            doc! {
                                "round_id": bson_uuid(round_id),
                                "submitter_id": bson_uuid(existing.submitter_id()),
                                "order": 2,
                            },
                            doc! {"$set": {"order": 1}},
                        )
                        .session(&mut *session)
                        .await
                        .map_err(write_err(SUBMISSIONS))?;
                }

                Ok(TxnOutcome::Commit(SubmissionWrite::Applied))
            })
        })
        .await
    }

    async fn find_submission(&self, id: Uuid) -> MongoResult<Option<SubmissionEntity>> {
        let collections = self.collections().await;
        let document = collections
            .submissions
            .find_one(doc_id(id))
            .await
            .map_err(read_err(SUBMISSIONS))?;
        Ok(document.map(Into::into))
    }

    async fn list_submissions(&self, round_id: Uuid) -> MongoResult<Vec<SubmissionEntity>> {
        let collections = self.collections().await;
        let documents: Vec<MongoSubmissionDocument> = collections
            .submissions
            .find(doc! {"round_id": bson_uuid(round_id)})
            .sort(doc! {"submitted_at": 1})
            .await
            .map_err(read_err(SUBMISSIONS))?
            .try_collect()
            .await
            .map_err(read_err(SUBMISSIONS))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn count_submissions(&self, round_id: Uuid, submitter_id: Uuid) -> MongoResult<usize> {
        let collections = self.collections().await;
        let count = collections
            .submissions
            .count_documents(doc! {
                "round_id": bson_uuid(round_id),
                "submitter_id": bson_uuid(submitter_id),
            })
            .await
            .map_err(read_err(SUBMISSIONS))?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn insert_vote(&self, vote: VoteEntity) -> MongoResult<VoteWrite> {
        let collections = self.collections().await;
        let (round_id, submission_id) = (vote.round_id, vote.submission_id);
        let document = MongoVoteDocument::from(vote);

        let outcome = self
            .run_transaction("insert_vote", |session| {
                let collections = collections.clone();
                let document = document.clone();
                Box::pin(async move {
                    let target = collections
                        .submissions
                        .find_one(doc_id(submission_id))
                        .session(&mut *session)
                        .await
                        .map_err(read_err(SUBMISSIONS))?;
                    if target.is_none() {
                        return Ok(TxnOutcome::Abort(VoteWrite::NotFound));
                    }

                    if !bump_round_in_phase(&collections.rounds, session, round_id, RoundPhase::Voting)
                        .await?
                    {
                        return Ok(TxnOutcome::Abort(VoteWrite::RoundClosed));
                    }

                    collections
                        .votes
                        .insert_one(&document)
                        .session(&mut *session)
                        .await
                        .map_err(write_err(VOTES))?;

                    let updated = collections
                        .submissions
                        .find_one_and_update(doc_id(submission_id), doc! {"$inc": {"tally": 1_i64}})
                        .return_document(ReturnDocument::After)
                        .session(&mut *session)
                        .await
                        .map_err(write_err(SUBMISSIONS))?;
                    let tally = updated.map(|s| s.tally()).unwrap_or_default();
                    Ok(TxnOutcome::Commit(VoteWrite::Applied { tally }))
                })
            })
            .await;

        match outcome {
            Err(err) if err.is_duplicate_key() => Ok(VoteWrite::SlotTaken),
            other => other,
        }
    }

    async fn delete_vote(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
        submission_id: Uuid,
    ) -> MongoResult<VoteWrite> {
        let collections = self.collections().await;
        self.run_transaction("delete_vote", |session| {
            let collections = collections.clone();
            Box::pin(async move {
                if !bump_round_in_phase(&collections.rounds, session, round_id, RoundPhase::Voting)
                    .await?
                {
                    return Ok(TxnOutcome::Abort(VoteWrite::RoundClosed));
                }

                let Some(latest) = collections
                    .votes
                    .find_one(doc! {
                        "round_id": bson_uuid(round_id),
                        "voter_id": bson_uuid(voter_id),
                        "submission_id": bson_uuid(submission_id),
                    })
                    .sort(doc! {"cast_at": -1, "slot": -1})
                    .session(&mut *session)
                    .await
                    .map_err(read_err(VOTES))?
                else {
                    return Ok(TxnOutcome::Abort(VoteWrite::NotFound));
                };

                collections
                    .votes
                    .delete_one(doc! {"_id": latest.id()})
                    .session(&mut *session)
                    .await
                    .map_err(write_err(VOTES))?;

                let updated = collections
                    .submissions
                    .find_one_and_update(
                        doc! {"_id": bson_uuid(submission_id), "tally": {"$gt": 0}},
                        doc! {"$inc": {"tally": -1_i64}},
                    )
                    .return_document(ReturnDocument::After)
                    .session(&mut *session)
                    .await
                    .map_err(write_err(SUBMISSIONS))?;
                let tally = updated.map(|s| s.tally()).unwrap_or_default();
                Ok(TxnOutcome::Commit(VoteWrite::Applied { tally }))
            })
        })
        .await
    }

    async fn find_votes(&self, filter: Document) -> MongoResult<Vec<VoteEntity>> {
        let collections = self.collections().await;
        let documents: Vec<MongoVoteDocument> = collections
            .votes
            .find(filter)
            .sort(doc! {"cast_at": 1, "slot": 1})
            .await
            .map_err(read_err(VOTES))?
            .try_collect()
            .await
            .map_err(read_err(VOTES))?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn count_voter_votes(&self, round_id: Uuid, voter_id: Uuid) -> MongoResult<usize> {
        let collections = self.collections().await;
        let count = collections
            .votes
            .count_documents(doc! {"round_id": bson_uuid(round_id), "voter_id": bson_uuid(voter_id)})
            .await
            .map_err(read_err(VOTES))?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}

impl BattleStore for MongoBattleStore {
    fn create_battle(
        &self,
        battle: BattleEntity,
        first_round: RoundEntity,
        creator: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .create_battle(battle, first_round, creator)
                .await
                .map_err(Into::into)
        })
    }

    fn find_battle(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<BattleEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_battle(id).await.map_err(Into::into) })
    }

    fn list_battles(&self) -> BoxFuture<'static, StorageResult<Vec<BattleEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_battles().await.map_err(Into::into) })
    }

    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.insert_round(round).await.map_err(Into::into) })
    }

    fn update_round_schedule(
        &self,
        round_id: Uuid,
        update: RoundScheduleUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_round_schedule(round_id, update)
                .await
                .map_err(Into::into)
        })
    }

    fn find_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_round(id).await.map_err(Into::into) })
    }

    fn find_round_by_ordinal(
        &self,
        battle_id: Uuid,
        ordinal: u32,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_round_by_ordinal(battle_id, ordinal)
                .await
                .map_err(Into::into)
        })
    }

    fn list_rounds(&self, battle_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_rounds(doc! {"battle_id": bson_uuid(battle_id)})
                .await
                .map_err(Into::into)
        })
    }

    fn list_in_flight_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let in_flight = [RoundPhase::Submission.as_str(), RoundPhase::Voting.as_str()];
            store
                .find_rounds(doc! {"phase": {"$in": in_flight.to_vec()}})
                .await
                .map_err(Into::into)
        })
    }

    fn apply_round_transition(
        &self,
        plan: TransitionPlan,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.apply_round_transition(plan).await.map_err(Into::into) })
    }

    fn commit_round_completion(
        &self,
        completion: RoundCompletion,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .commit_round_completion(completion)
                .await
                .map_err(Into::into)
        })
    }

    fn set_round_artifact(
        &self,
        round_id: Uuid,
        artifact: ArtifactEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .set_round_artifact(round_id, artifact)
                .await
                .map_err(Into::into)
        })
    }

    fn join_battle(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<JoinOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.join_battle(participant).await.map_err(Into::into) })
    }

    fn find_participant(
        &self,
        battle_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_participant(battle_id, user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_participants(
        &self,
        battle_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_participants(battle_id).await.map_err(Into::into) })
    }

    fn insert_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>> {
        let store = self.clone();
        Box::pin(async move { store.insert_submission(submission).await.map_err(Into::into) })
    }

    fn replace_submission_content(
        &self,
        submission_id: Uuid,
        content_ref: String,
        content_key: String,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_submission_content(submission_id, content_ref, content_key)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_submission(
        &self,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>> {
        let store = self.clone();
        Box::pin(async move { store.delete_submission(submission_id).await.map_err(Into::into) })
    }

    fn find_submission(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_submission(id).await.map_err(Into::into) })
    }

    fn list_submissions(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_submissions(round_id).await.map_err(Into::into) })
    }

    fn count_submissions(
        &self,
        round_id: Uuid,
        submitter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_submissions(round_id, submitter_id)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteWrite>> {
        let store = self.clone();
        Box::pin(async move { store.insert_vote(vote).await.map_err(Into::into) })
    }

    fn delete_vote(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<VoteWrite>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_vote(round_id, voter_id, submission_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_voter_votes(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_votes(doc! {"round_id": bson_uuid(round_id), "voter_id": bson_uuid(voter_id)})
                .await
                .map_err(Into::into)
        })
    }

    fn count_voter_votes(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .count_voter_votes(round_id, voter_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_submission_votes(
        &self,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_votes(doc! {"submission_id": bson_uuid(submission_id)})
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
