//! In-process [`BattleStore`] keeping every collection behind one write lock, which
//! makes each trait call a serializable transaction.

use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{
            Advancement, ArtifactEntity, BattleEntity, BattleStatus, JoinOutcome,
            ParticipantEntity, RoundCompletion, RoundEntity, RoundScheduleUpdate,
            SubmissionEntity, SubmissionWrite, VoteEntity, VoteWrite,
        },
        storage::StorageResult,
    },
    state::round_machine::{RoundPhase, TransitionPlan},
};

/// Memory-backed [`BattleStore`] used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryBattleStore {
    inner: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    battles: IndexMap<Uuid, BattleEntity>,
    rounds: IndexMap<Uuid, RoundEntity>,
    participants: IndexMap<(Uuid, Uuid), ParticipantEntity>,
    submissions: IndexMap<Uuid, SubmissionEntity>,
    votes: IndexMap<Uuid, VoteEntity>,
}

impl MemoryBattleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn plan_matches(&self, plan: &TransitionPlan) -> bool {
        self.rounds
            .get(&plan.round_id)
            .is_some_and(|round| round.phase == plan.from && round.version == plan.version)
    }

    fn has_round(&self, battle_id: Uuid, ordinal: u32) -> bool {
        self.rounds
            .values()
            .any(|round| round.battle_id == battle_id && round.ordinal == ordinal)
    }

    fn apply_plan(&mut self, plan: &TransitionPlan, now: SystemTime) {
        let Some(round) = self.rounds.get_mut(&plan.round_id) else {
            return;
        };
        round.phase = plan.to;
        round.version = plan.version_next;
        round.updated_at = now;

        if plan.to == RoundPhase::Submission {
            let battle_id = round.battle_id;
            if let Some(battle) = self.battles.get_mut(&battle_id) {
                battle.current_round_id = Some(plan.round_id);
                battle.updated_at = now;
            }
        }
    }

    fn round_in_phase(&self, round_id: Uuid, phase: RoundPhase) -> bool {
        self.rounds
            .get(&round_id)
            .is_some_and(|round| round.phase == phase)
    }

    fn bump_round(&mut self, round_id: Uuid) {
        if let Some(round) = self.rounds.get_mut(&round_id) {
            round.version += 1;
        }
    }

    fn duplicate_content(
        &self,
        round_id: Uuid,
        content_key: &str,
        exclude: Option<Uuid>,
    ) -> Option<Uuid> {
        self.submissions
            .values()
            .find(|existing| {
                existing.round_id == round_id
                    && existing.content_key == content_key
                    && Some(existing.id) != exclude
            })
            .map(|existing| existing.submitter_id)
    }
}

impl BattleStore for MemoryBattleStore {
    fn create_battle(
        &self,
        battle: BattleEntity,
        first_round: RoundEntity,
        creator: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            state
                .participants
                .insert((creator.battle_id, creator.user_id), creator);
            state.rounds.insert(first_round.id, first_round);
            state.battles.insert(battle.id, battle);
            Ok(())
        })
    }

    fn find_battle(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<BattleEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.battles.get(&id).cloned()) })
    }

    fn list_battles(&self) -> BoxFuture<'static, StorageResult<Vec<BattleEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.battles.values().cloned().collect()) })
    }

    fn insert_round(&self, round: RoundEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let active = state
                .battles
                .get(&round.battle_id)
                .is_some_and(|battle| battle.status == BattleStatus::Active);
            if !active || state.has_round(round.battle_id, round.ordinal) {
                return Ok(false);
            }
            state.rounds.insert(round.id, round);
            Ok(true)
        })
    }

    fn update_round_schedule(
        &self,
        round_id: Uuid,
        update: RoundScheduleUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let Some(round) = state.rounds.get_mut(&round_id) else {
                return Ok(None);
            };
            if !matches!(round.phase, RoundPhase::Pending | RoundPhase::Submission) {
                return Ok(None);
            }
            round.theme = update.theme;
            round.description = update.description;
            round.submission_deadline = update.submission_deadline;
            round.voting_deadline = update.voting_deadline;
            round.updated_at = update.updated_at;
            round.version += 1;
            Ok(Some(round.clone()))
        })
    }

    fn find_round(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.rounds.get(&id).cloned()) })
    }

    fn find_round_by_ordinal(
        &self,
        battle_id: Uuid,
        ordinal: u32,
    ) -> BoxFuture<'static, StorageResult<Option<RoundEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .rounds
                .values()
                .find(|round| round.battle_id == battle_id && round.ordinal == ordinal)
                .cloned())
        })
    }

    fn list_rounds(&self, battle_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            let mut rounds: Vec<RoundEntity> = state
                .rounds
                .values()
                .filter(|round| round.battle_id == battle_id)
                .cloned()
                .collect();
            rounds.sort_by_key(|round| round.ordinal);
            Ok(rounds)
        })
    }

    fn list_in_flight_rounds(&self) -> BoxFuture<'static, StorageResult<Vec<RoundEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .rounds
                .values()
                .filter(|round| round.phase.is_in_flight())
                .cloned()
                .collect())
        })
    }

    fn apply_round_transition(
        &self,
        plan: TransitionPlan,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if !state.plan_matches(&plan) {
                return Ok(false);
            }
            state.apply_plan(&plan, SystemTime::now());
            Ok(true)
        })
    }

    fn commit_round_completion(
        &self,
        completion: RoundCompletion,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if !state.plan_matches(&completion.plan) {
                return Ok(false);
            }
            match &completion.advancement {
                Advancement::Activate(next) => {
                    if !state.plan_matches(next) {
                        return Ok(false);
                    }
                }
                Advancement::FinishBattle { .. } => {
                    // A round appended after planning must be activated instead.
                    let active = state
                        .battles
                        .get(&completion.battle_id)
                        .is_some_and(|battle| battle.status == BattleStatus::Active);
                    if !active || state.has_round(completion.battle_id, completion.ordinal + 1) {
                        return Ok(false);
                    }
                }
            }

            let now = completion.completed_at;
            state.apply_plan(&completion.plan, now);
            if let Some(round) = state.rounds.get_mut(&completion.plan.round_id) {
                round.winner_ids = completion.winner_ids.clone();
                round.completed_at = Some(now);
            }

            for (user_id, credits) in &completion.credits {
                if let Some(participant) = state
                    .participants
                    .get_mut(&(completion.battle_id, *user_id))
                {
                    participant.total_credits += credits;
                }
            }
            for user_id in &completion.winner_ids {
                if let Some(participant) = state
                    .participants
                    .get_mut(&(completion.battle_id, *user_id))
                {
                    participant.rounds_won += 1;
                }
            }

            match completion.advancement {
                Advancement::Activate(next) => state.apply_plan(&next, now),
                Advancement::FinishBattle { champion_ids } => {
                    if let Some(battle) = state.battles.get_mut(&completion.battle_id) {
                        battle.status = BattleStatus::Completed;
                        battle.current_round_id = None;
                        battle.champion_ids = champion_ids;
                        battle.updated_at = now;
                    }
                }
            }

            Ok(true)
        })
    }

    fn set_round_artifact(
        &self,
        round_id: Uuid,
        artifact: ArtifactEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let Some(round) = state.rounds.get_mut(&round_id) else {
                return Ok(false);
            };
            if round.artifact.as_ref().is_some_and(ArtifactEntity::is_ready) {
                return Ok(false);
            }
            round.artifact = Some(artifact);
            Ok(true)
        })
    }

    fn join_battle(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<JoinOutcome>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let key = (participant.battle_id, participant.user_id);
            if state.participants.contains_key(&key) {
                return Ok(JoinOutcome::AlreadyMember);
            }
            let Some(battle) = state.battles.get_mut(&participant.battle_id) else {
                return Ok(JoinOutcome::BattleClosed);
            };
            if battle.status != BattleStatus::Active {
                return Ok(JoinOutcome::BattleClosed);
            }
            if battle.participant_count >= battle.capacity {
                return Ok(JoinOutcome::Full);
            }
            battle.participant_count += 1;
            state.participants.insert(key, participant);
            Ok(JoinOutcome::Joined)
        })
    }

    fn find_participant(
        &self,
        battle_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .read()
                .await
                .participants
                .get(&(battle_id, user_id))
                .cloned())
        })
    }

    fn list_participants(
        &self,
        battle_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .participants
                .values()
                .filter(|participant| participant.battle_id == battle_id)
                .cloned()
                .collect())
        })
    }

    fn insert_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if !state.round_in_phase(submission.round_id, RoundPhase::Submission) {
                return Ok(SubmissionWrite::RoundClosed);
            }
            if let Some(submitter_id) =
                state.duplicate_content(submission.round_id, &submission.content_key, None)
            {
                return Ok(SubmissionWrite::DuplicateContent { submitter_id });
            }
            let order_taken = state.submissions.values().any(|existing| {
                existing.round_id == submission.round_id
                    && existing.submitter_id == submission.submitter_id
                    && existing.order == submission.order
            });
            if order_taken {
                return Ok(SubmissionWrite::OrderTaken);
            }
            let round_id = submission.round_id;
            state.submissions.insert(submission.id, submission);
            state.bump_round(round_id);
            Ok(SubmissionWrite::Applied)
        })
    }

    fn replace_submission_content(
        &self,
        submission_id: Uuid,
        content_ref: String,
        content_key: String,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let Some(round_id) = state.submissions.get(&submission_id).map(|s| s.round_id) else {
                return Ok(SubmissionWrite::NotFound);
            };
            if !state.round_in_phase(round_id, RoundPhase::Submission) {
                return Ok(SubmissionWrite::RoundClosed);
            }
            if let Some(submitter_id) =
                state.duplicate_content(round_id, &content_key, Some(submission_id))
            {
                return Ok(SubmissionWrite::DuplicateContent { submitter_id });
            }
            if let Some(submission) = state.submissions.get_mut(&submission_id) {
                submission.content_ref = content_ref;
                submission.content_key = content_key;
            }
            state.bump_round(round_id);
            Ok(SubmissionWrite::Applied)
        })
    }

    fn delete_submission(
        &self,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<SubmissionWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            let Some(existing) = state.submissions.get(&submission_id).cloned() else {
                return Ok(SubmissionWrite::NotFound);
            };
            if !state.round_in_phase(existing.round_id, RoundPhase::Submission) {
                return Ok(SubmissionWrite::RoundClosed);
            }
            state.submissions.shift_remove(&submission_id);
            if existing.order == 1 {
                if let Some(second) = state.submissions.values_mut().find(|other| {
                    other.round_id == existing.round_id
                        && other.submitter_id == existing.submitter_id
                }) {
                    second.order = 1;
                }
            }
            state.bump_round(existing.round_id);
            Ok(SubmissionWrite::Applied)
        })
    }

    fn find_submission(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.read().await.submissions.get(&id).cloned()) })
    }

    fn list_submissions(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .submissions
                .values()
                .filter(|submission| submission.round_id == round_id)
                .cloned()
                .collect())
        })
    }

    fn count_submissions(
        &self,
        round_id: Uuid,
        submitter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .submissions
                .values()
                .filter(|s| s.round_id == round_id && s.submitter_id == submitter_id)
                .count())
        })
    }

    fn insert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<VoteWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if !state.submissions.contains_key(&vote.submission_id) {
                return Ok(VoteWrite::NotFound);
            }
            if !state.round_in_phase(vote.round_id, RoundPhase::Voting) {
                return Ok(VoteWrite::RoundClosed);
            }
            let slot_taken = state.votes.values().any(|existing| {
                existing.round_id == vote.round_id
                    && existing.voter_id == vote.voter_id
                    && existing.slot == vote.slot
            });
            if slot_taken {
                return Ok(VoteWrite::SlotTaken);
            }

            let (round_id, submission_id) = (vote.round_id, vote.submission_id);
            state.votes.insert(vote.id, vote);
            let tally = match state.submissions.get_mut(&submission_id) {
                Some(submission) => {
                    submission.tally += 1;
                    submission.tally
                }
                None => 0,
            };
            state.bump_round(round_id);
            Ok(VoteWrite::Applied { tally })
        })
    }

    fn delete_vote(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<VoteWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut state = inner.write().await;
            if !state.round_in_phase(round_id, RoundPhase::Voting) {
                return Ok(VoteWrite::RoundClosed);
            }
            let latest = state
                .votes
                .values()
                .filter(|vote| {
                    vote.round_id == round_id
                        && vote.voter_id == voter_id
                        && vote.submission_id == submission_id
                })
                .max_by_key(|vote| (vote.cast_at, vote.slot))
                .map(|vote| vote.id);
            let Some(vote_id) = latest else {
                return Ok(VoteWrite::NotFound);
            };

            state.votes.shift_remove(&vote_id);
            let tally = match state.submissions.get_mut(&submission_id) {
                Some(submission) => {
                    submission.tally = submission.tally.saturating_sub(1);
                    submission.tally
                }
                None => 0,
            };
            state.bump_round(round_id);
            Ok(VoteWrite::Applied { tally })
        })
    }

    fn list_voter_votes(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .votes
                .values()
                .filter(|vote| vote.round_id == round_id && vote.voter_id == voter_id)
                .cloned()
                .collect())
        })
    }

    fn count_voter_votes(
        &self,
        round_id: Uuid,
        voter_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .votes
                .values()
                .filter(|vote| vote.round_id == round_id && vote.voter_id == voter_id)
                .count())
        })
    }

    fn list_submission_votes(
        &self,
        submission_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.read().await;
            Ok(state
                .votes
                .values()
                .filter(|vote| vote.submission_id == submission_id)
                .cloned()
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dao::models::Visibility,
        state::round_machine::{self, CompletionReason, RoundEvent},
    };

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn battle(capacity: u32) -> BattleEntity {
        BattleEntity {
            id: Uuid::new_v4(),
            name: "Friday battle".into(),
            creator_id: Uuid::new_v4(),
            visibility: Visibility::Public,
            capacity,
            double_submissions: true,
            status: BattleStatus::Active,
            current_round_id: None,
            participant_count: 1,
            champion_ids: Vec::new(),
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn round(battle: &BattleEntity, ordinal: u32, phase: RoundPhase) -> RoundEntity {
        RoundEntity {
            id: Uuid::new_v4(),
            battle_id: battle.id,
            ordinal,
            theme: format!("Theme {ordinal}"),
            description: String::new(),
            submission_deadline: at(100),
            voting_deadline: at(200),
            phase,
            version: 0,
            winner_ids: Vec::new(),
            artifact: None,
            completed_at: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn participant(battle_id: Uuid, user_id: Uuid) -> ParticipantEntity {
        ParticipantEntity {
            battle_id,
            user_id,
            display_name: "someone".into(),
            joined_at: at(0),
            total_credits: 0,
            rounds_won: 0,
        }
    }

    fn submission(round: &RoundEntity, submitter_id: Uuid, key: &str, order: u8) -> SubmissionEntity {
        SubmissionEntity {
            id: Uuid::new_v4(),
            round_id: round.id,
            battle_id: round.battle_id,
            submitter_id,
            content_ref: key.into(),
            content_key: key.into(),
            order,
            submitted_at: at(10),
            tally: 0,
        }
    }

    async fn seeded(capacity: u32) -> (MemoryBattleStore, BattleEntity, RoundEntity) {
        let store = MemoryBattleStore::new();
        let mut battle = battle(capacity);
        let first = round(&battle, 1, RoundPhase::Submission);
        battle.current_round_id = Some(first.id);
        store
            .create_battle(
                battle.clone(),
                first.clone(),
                participant(battle.id, battle.creator_id),
            )
            .await
            .unwrap();
        (store, battle, first)
    }

    #[tokio::test]
    async fn join_respects_capacity_and_membership() {
        let (store, battle, _) = seeded(2).await;
        let user = Uuid::new_v4();

        assert_eq!(
            store.join_battle(participant(battle.id, user)).await.unwrap(),
            JoinOutcome::Joined
        );
        assert_eq!(
            store.join_battle(participant(battle.id, user)).await.unwrap(),
            JoinOutcome::AlreadyMember
        );
        assert_eq!(
            store
                .join_battle(participant(battle.id, Uuid::new_v4()))
                .await
                .unwrap(),
            JoinOutcome::Full
        );
        assert_eq!(store.list_participants(battle.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deleting_first_entry_renumbers_the_second() {
        let (store, battle, first) = seeded(4).await;
        let one = submission(&first, battle.creator_id, "spotify:track:a", 1);
        let two = submission(&first, battle.creator_id, "spotify:track:b", 2);
        store.insert_submission(one.clone()).await.unwrap();
        store.insert_submission(two.clone()).await.unwrap();

        assert_eq!(
            store.delete_submission(one.id).await.unwrap(),
            SubmissionWrite::Applied
        );
        let remaining = store.find_submission(two.id).await.unwrap().unwrap();
        assert_eq!(remaining.order, 1);
        assert_eq!(
            store.count_submissions(first.id, battle.creator_id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn duplicate_content_reports_first_submitter() {
        let (store, battle, first) = seeded(4).await;
        let other = Uuid::new_v4();
        store
            .insert_submission(submission(&first, battle.creator_id, "spotify:track:a", 1))
            .await
            .unwrap();

        let outcome = store
            .insert_submission(submission(&first, other, "spotify:track:a", 1))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmissionWrite::DuplicateContent {
                submitter_id: battle.creator_id
            }
        );
    }

    #[tokio::test]
    async fn stale_completion_is_not_applied() {
        let (store, battle, first) = seeded(4).await;
        let voting = round_machine::plan(&first, RoundEvent::BeginVoting).unwrap();
        assert!(store.apply_round_transition(voting.clone()).await.unwrap());
        assert!(!store.apply_round_transition(voting).await.unwrap());

        let observed = store.find_round(first.id).await.unwrap().unwrap();
        let plan = round_machine::plan(
            &observed,
            RoundEvent::Complete(CompletionReason::DeadlineReached),
        )
        .unwrap();

        let target = submission(&first, battle.creator_id, "spotify:track:a", 1);
        {
            let mut state = store.inner.write().await;
            state.submissions.insert(target.id, target.clone());
        }
        let vote = VoteEntity {
            id: Uuid::new_v4(),
            round_id: first.id,
            voter_id: Uuid::new_v4(),
            submission_id: target.id,
            slot: 1,
            cast_at: at(150),
        };
        assert_eq!(
            store.insert_vote(vote).await.unwrap(),
            VoteWrite::Applied { tally: 1 }
        );

        let applied = store
            .commit_round_completion(RoundCompletion {
                plan,
                battle_id: battle.id,
                ordinal: 1,
                credits: Vec::new(),
                winner_ids: Vec::new(),
                advancement: Advancement::FinishBattle {
                    champion_ids: Vec::new(),
                },
                completed_at: at(201),
            })
            .await
            .unwrap();

        assert!(!applied);
        let round = store.find_round(first.id).await.unwrap().unwrap();
        assert_eq!(round.phase, RoundPhase::Voting);
        let battle = store.find_battle(battle.id).await.unwrap().unwrap();
        assert_eq!(battle.status, BattleStatus::Active);
    }

    #[tokio::test]
    async fn finishing_the_battle_loses_to_an_appended_round() {
        let (store, battle, first) = seeded(4).await;
        let voting = round_machine::plan(&first, RoundEvent::BeginVoting).unwrap();
        assert!(store.apply_round_transition(voting).await.unwrap());
        let observed = store.find_round(first.id).await.unwrap().unwrap();
        let plan = round_machine::plan(
            &observed,
            RoundEvent::Complete(CompletionReason::DeadlineReached),
        )
        .unwrap();

        let second = round(&battle, 2, RoundPhase::Pending);
        assert!(store.insert_round(second.clone()).await.unwrap());

        let applied = store
            .commit_round_completion(RoundCompletion {
                plan,
                battle_id: battle.id,
                ordinal: 1,
                credits: Vec::new(),
                winner_ids: Vec::new(),
                advancement: Advancement::FinishBattle {
                    champion_ids: Vec::new(),
                },
                completed_at: at(201),
            })
            .await
            .unwrap();

        assert!(!applied);
        let battle = store.find_battle(battle.id).await.unwrap().unwrap();
        assert_eq!(battle.status, BattleStatus::Active);
        assert_eq!(battle.current_round_id, Some(first.id));
        let first = store.find_round(first.id).await.unwrap().unwrap();
        assert_eq!(first.phase, RoundPhase::Voting);
    }

    #[tokio::test]
    async fn ready_artifact_is_not_overwritten() {
        let (store, _, first) = seeded(4).await;
        let ready = ArtifactEntity::Ready {
            url: "https://example.test/playlist/1".into(),
            generated_at: at(120),
        };
        assert!(store.set_round_artifact(first.id, ready.clone()).await.unwrap());
        assert!(
            !store
                .set_round_artifact(
                    first.id,
                    ArtifactEntity::Failed {
                        reason: "late".into(),
                        failed_at: at(121),
                    },
                )
                .await
                .unwrap()
        );
        let round = store.find_round(first.id).await.unwrap().unwrap();
        assert_eq!(round.artifact, Some(ready));
    }

    #[tokio::test]
    async fn taken_order_is_reported() {
        let (store, battle, first) = seeded(4).await;
        store
            .insert_submission(submission(&first, battle.creator_id, "spotify:track:a", 1))
            .await
            .unwrap();

        let outcome = store
            .insert_submission(submission(&first, battle.creator_id, "spotify:track:b", 1))
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionWrite::OrderTaken);
        assert_eq!(
            store.count_submissions(first.id, battle.creator_id).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn taken_vote_slot_is_reported_without_touching_the_tally() {
        let (store, battle, first) = seeded(4).await;
        let target = submission(&first, battle.creator_id, "spotify:track:a", 1);
        store.insert_submission(target.clone()).await.unwrap();
        let observed = store.find_round(first.id).await.unwrap().unwrap();
        let voting = round_machine::plan(&observed, RoundEvent::BeginVoting).unwrap();
        assert!(store.apply_round_transition(voting).await.unwrap());

        let voter = Uuid::new_v4();
        let vote = |slot| VoteEntity {
            id: Uuid::new_v4(),
            round_id: first.id,
            voter_id: voter,
            submission_id: target.id,
            slot,
            cast_at: at(150),
        };
        assert_eq!(
            store.insert_vote(vote(1)).await.unwrap(),
            VoteWrite::Applied { tally: 1 }
        );
        assert_eq!(store.insert_vote(vote(1)).await.unwrap(), VoteWrite::SlotTaken);

        let stored = store.find_submission(target.id).await.unwrap().unwrap();
        assert_eq!(stored.tally, 1);
        assert_eq!(store.count_voter_votes(first.id, voter).await.unwrap(), 1);
    }
}
