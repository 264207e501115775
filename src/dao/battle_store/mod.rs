pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    ArtifactEntity, BattleEntity, JoinOutcome, ParticipantEntity, RoundCompletion, RoundEntity,
    RoundScheduleUpdate, SubmissionEntity, SubmissionWrite, VoteEntity, VoteWrite,
};
use crate::dao::storage::StorageResult;
use crate::state::round_machine::TransitionPlan;

/// Abstraction over the persistence layer for battles, rounds and their ledgers.
///
/// Every guarded write (`*_write` outcomes, transition plans, round completion)
/// is applied atomically by the backend: either all documents change or none.
pub trait BattleStore: Send + Sync {
    /// Persist a new battle together with its first round and the creator's membership.
    fn create_battle(
        &self,
        battle: BattleEntity,
        first_round: RoundEntity,
        creator: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn find_battle(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<BattleEntity>>>;
    fn list_battles(&self) -> BoxFuture<'static, StorageResult<Vec<BattleEntity>>>;

    /// Append a round; returns `false` when the ordinal is already taken or the battle
    /// is no longer active.
    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<bool>>;
    /// Rewrite theme and deadlines while the round is pending or accepting submissions.
    fn update_round_schedule(
        &self,
        round_id: Uuid,
        update: RoundScheduleUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    fn find_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    fn find_round_by_ordinal(
        &self,
        battle_id: Uuid,
        ordinal: u32,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>>;
    /// Rounds of a battle ordered by ordinal.
    fn list_rounds(&self, battle_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    /// Rounds in submission or voting phase, across all battles.
    fn list_in_flight_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>>;
    /// Compare-and-set the round phase; `false` when the round moved on.
    fn apply_round_transition(&self, plan: TransitionPlan)
    -> BoxFuture<'static, StorageResult<bool>>;
    /// Close a round, update participant totals and advance the battle in one write.
    fn commit_round_completion(
        &self,
        completion: RoundCompletion,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Record the artifact outcome unless a ready artifact is already stored.
    fn set_round_artifact(
        &self,
        round_id: Uuid,
        artifact: ArtifactEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Add a participant while honouring the battle capacity.
    fn join_battle(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<JoinOutcome>>;
    fn find_participant(
        &self,
        battle_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    fn list_participants(
        &self,
        battle_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;

    /// Insert a submission while its round is still accepting entries.
    fn insert_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>>;
    /// Swap the content of an existing submission.
    fn replace_submission_content(
        &self,
        submission_id: Uuid,
        content_ref: String,
        content_key: String,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>>;
    /// Delete a submission and renumber the submitter's remaining entry.
    fn delete_submission(
        &self,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>>;
    fn find_submission(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>>;
    fn list_submissions(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>>;
    fn count_submissions(
        &self,
        round_id: Uuid,
        submitter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<usize>>;

    /// Insert a vote and increment the target tally together.
    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteWrite>>;
    /// Delete the most recent matching vote and decrement the target tally together.
    fn delete_vote(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<VoteWrite>>;
    fn list_voter_votes(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;
    fn count_voter_votes(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<usize>>;
    fn list_submission_votes(
        &self,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
