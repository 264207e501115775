use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{
            BattleEntity, BattleStatus, JoinOutcome, ParticipantEntity, RoundEntity,
            RoundScheduleUpdate, Visibility,
        },
    },
    dto::{
        battle::{
            BattleDetails, BattleList, CreateBattleRequest, EnrollParticipantRequest,
            JoinBattleRequest, MembershipView,
        },
        parse_timestamp,
        round::{CurrentRoundView, RoundEnvelope, RoundInput},
        submission::SubmissionView,
    },
    error::{Rejection, ServiceError},
    services::{
        guards::{ensure_deadline_order, load_battle, load_round, require_creator},
        vote_service::VOTES_PER_ROUND,
    },
    state::round_machine::RoundPhase,
};

const LOCKED_SCHEDULE: &str = "rounds cannot be edited once voting has started";

/// Parsed and ordered deadlines of a [`RoundInput`].
struct Schedule {
    submission_deadline: SystemTime,
    voting_deadline: SystemTime,
}

fn parse_schedule(input: &RoundInput, now: SystemTime) -> Result<Schedule, Rejection> {
    let submission_deadline = parse_timestamp("submission_deadline", &input.submission_deadline)?;
    let voting_deadline = parse_timestamp("voting_deadline", &input.voting_deadline)?;
    ensure_deadline_order(submission_deadline, voting_deadline)?;
    if submission_deadline <= now {
        return Err(Rejection::InvalidInput(
            "the submission deadline must be in the future".into(),
        ));
    }
    Ok(Schedule {
        submission_deadline,
        voting_deadline,
    })
}

/// Private battles are only visible to their creator and participants.
async fn ensure_visible(
    store: &dyn BattleStore,
    battle: &BattleEntity,
    actor: Uuid,
) -> Result<(), ServiceError> {
    if battle.visibility == Visibility::Public || battle.creator_id == actor {
        return Ok(());
    }
    match store.find_participant(battle.id, actor).await? {
        Some(_) => Ok(()),
        None => Err(Rejection::NotFound(format!("battle `{}` not found", battle.id)).into()),
    }
}

/// Open a battle with its first round already accepting submissions. The creator
/// joins as the first participant.
pub async fn create_battle(
    store: &dyn BattleStore,
    actor: Uuid,
    request: CreateBattleRequest,
    now: SystemTime,
) -> Result<BattleDetails, ServiceError> {
    let schedule = parse_schedule(&request.first_round, now)?;
    let battle_id = Uuid::new_v4();
    let round_id = Uuid::new_v4();

    let battle = BattleEntity {
        id: battle_id,
        name: request.name.trim().to_owned(),
        creator_id: actor,
        visibility: request.visibility,
        capacity: request.capacity,
        double_submissions: request.double_submissions,
        status: BattleStatus::Active,
        current_round_id: Some(round_id),
        participant_count: 1,
        champion_ids: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    let round = RoundEntity {
        id: round_id,
        battle_id,
        ordinal: 1,
        theme: request.first_round.theme.trim().to_owned(),
        description: request.first_round.description,
        submission_deadline: schedule.submission_deadline,
        voting_deadline: schedule.voting_deadline,
        phase: RoundPhase::Submission,
        version: 0,
        winner_ids: Vec::new(),
        artifact: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };
    let creator = ParticipantEntity {
        battle_id,
        user_id: actor,
        display_name: request.display_name.trim().to_owned(),
        joined_at: now,
        total_credits: 0,
        rounds_won: 0,
    };

    store
        .create_battle(battle.clone(), round.clone(), creator.clone())
        .await?;
    info!(battle_id = %battle_id, creator = %actor, "battle created");

    Ok(BattleDetails {
        battle: battle.into(),
        rounds: vec![round.into()],
        participants: vec![creator.into()],
    })
}

/// Append a pending round after the battle's last one.
pub async fn add_round(
    store: &dyn BattleStore,
    actor: Uuid,
    battle_id: Uuid,
    input: RoundInput,
    now: SystemTime,
) -> Result<RoundEnvelope, ServiceError> {
    let battle = load_battle(store, battle_id).await?;
    require_creator(&battle, actor, "add rounds")?;
    if battle.status == BattleStatus::Completed {
        return Err(Rejection::Conflict("the battle is already completed".into()).into());
    }
    let schedule = parse_schedule(&input, now)?;

    let rounds = store.list_rounds(battle.id).await?;
    if let Some(last) = rounds.last() {
        if schedule.submission_deadline <= last.voting_deadline {
            return Err(Rejection::InvariantViolation(format!(
                "round {} must open after round {} finished voting",
                last.ordinal + 1,
                last.ordinal
            ))
            .into());
        }
    }
    let ordinal = rounds.last().map_or(1, |last| last.ordinal + 1);

    let round = RoundEntity {
        id: Uuid::new_v4(),
        battle_id: battle.id,
        ordinal,
        theme: input.theme.trim().to_owned(),
        description: input.description,
        submission_deadline: schedule.submission_deadline,
        voting_deadline: schedule.voting_deadline,
        phase: RoundPhase::Pending,
        version: 0,
        winner_ids: Vec::new(),
        artifact: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };

    if !store.insert_round(round.clone()).await? {
        return Err(Rejection::Conflict(
            "the battle changed while adding the round; please retry".into(),
        )
        .into());
    }
    info!(battle_id = %battle.id, round_id = %round.id, ordinal, "round added");
    Ok(RoundEnvelope {
        round: round.into(),
    })
}

/// Change theme and deadlines of a round that has not started voting.
pub async fn update_round(
    store: &dyn BattleStore,
    actor: Uuid,
    round_id: Uuid,
    input: RoundInput,
    now: SystemTime,
) -> Result<RoundEnvelope, ServiceError> {
    let round = load_round(store, round_id).await?;
    let battle = load_battle(store, round.battle_id).await?;
    require_creator(&battle, actor, "edit rounds")?;
    if !matches!(round.phase, RoundPhase::Pending | RoundPhase::Submission) {
        return Err(Rejection::PhaseViolation(LOCKED_SCHEDULE.into()).into());
    }
    let schedule = parse_schedule(&input, now)?;

    let update = RoundScheduleUpdate {
        theme: input.theme.trim().to_owned(),
        description: input.description,
        submission_deadline: schedule.submission_deadline,
        voting_deadline: schedule.voting_deadline,
        updated_at: now,
    };
    let updated = store
        .update_round_schedule(round.id, update)
        .await?
        .ok_or_else(|| Rejection::PhaseViolation(LOCKED_SCHEDULE.into()))?;

    info!(round_id = %updated.id, "round schedule updated");
    Ok(RoundEnvelope {
        round: updated.into(),
    })
}

async fn admit(
    store: &dyn BattleStore,
    battle: &BattleEntity,
    user_id: Uuid,
    display_name: &str,
    now: SystemTime,
) -> Result<MembershipView, ServiceError> {
    let participant = ParticipantEntity {
        battle_id: battle.id,
        user_id,
        display_name: display_name.trim().to_owned(),
        joined_at: now,
        total_credits: 0,
        rounds_won: 0,
    };

    match store.join_battle(participant.clone()).await? {
        JoinOutcome::Joined => {
            info!(battle_id = %battle.id, user_id = %user_id, "participant joined");
            Ok(MembershipView {
                battle_id: battle.id,
                participant: participant.into(),
            })
        }
        JoinOutcome::AlreadyMember => {
            Err(Rejection::Conflict("already a participant in this battle".into()).into())
        }
        JoinOutcome::Full => Err(Rejection::InvariantViolation(format!(
            "the battle is full ({} participants)",
            battle.capacity
        ))
        .into()),
        JoinOutcome::BattleClosed => {
            Err(Rejection::Conflict("the battle no longer accepts participants".into()).into())
        }
    }
}

/// Join a public battle.
pub async fn join_battle(
    store: &dyn BattleStore,
    actor: Uuid,
    battle_id: Uuid,
    request: JoinBattleRequest,
    now: SystemTime,
) -> Result<MembershipView, ServiceError> {
    let battle = load_battle(store, battle_id).await?;
    if battle.visibility == Visibility::Private {
        return Err(Rejection::Unauthorized(
            "this battle is private; ask its creator to enroll you".into(),
        )
        .into());
    }
    admit(store, &battle, actor, &request.display_name, now).await
}

/// Enroll a user on behalf of the battle creator.
pub async fn enroll_participant(
    store: &dyn BattleStore,
    actor: Uuid,
    battle_id: Uuid,
    request: EnrollParticipantRequest,
    now: SystemTime,
) -> Result<MembershipView, ServiceError> {
    let battle = load_battle(store, battle_id).await?;
    require_creator(&battle, actor, "enroll participants")?;
    admit(store, &battle, request.user_id, &request.display_name, now).await
}

pub async fn get_battle(
    store: &dyn BattleStore,
    actor: Uuid,
    battle_id: Uuid,
) -> Result<BattleDetails, ServiceError> {
    let battle = load_battle(store, battle_id).await?;
    ensure_visible(store, &battle, actor).await?;

    let rounds = store.list_rounds(battle.id).await?;
    let participants = store.list_participants(battle.id).await?;
    Ok(BattleDetails {
        battle: battle.into(),
        rounds: rounds.into_iter().map(Into::into).collect(),
        participants: participants.into_iter().map(Into::into).collect(),
    })
}

/// Public battles plus the private ones the actor created or takes part in.
pub async fn list_battles(store: &dyn BattleStore, actor: Uuid) -> Result<BattleList, ServiceError> {
    let mut battles = Vec::new();
    for battle in store.list_battles().await? {
        let visible = battle.visibility == Visibility::Public
            || battle.creator_id == actor
            || store.find_participant(battle.id, actor).await?.is_some();
        if visible {
            battles.push(battle.into());
        }
    }
    Ok(BattleList { battles })
}

/// The battle's current round as seen by `actor`.
pub async fn get_current_round(
    store: &dyn BattleStore,
    actor: Uuid,
    battle_id: Uuid,
) -> Result<CurrentRoundView, ServiceError> {
    let battle = load_battle(store, battle_id).await?;
    ensure_visible(store, &battle, actor).await?;

    let Some(round_id) = battle.current_round_id else {
        return Ok(CurrentRoundView {
            battle_id: battle.id,
            round: None,
            submissions: Vec::new(),
            my_votes: Vec::new(),
            votes_remaining: None,
        });
    };
    let round = load_round(store, round_id).await?;
    let submissions = store.list_submissions(round.id).await?;

    let (submissions, my_votes, votes_remaining) = match round.phase {
        RoundPhase::Pending | RoundPhase::Submission => (
            submissions
                .into_iter()
                .filter(|submission| submission.submitter_id == actor)
                .map(SubmissionView::from)
                .collect(),
            Vec::new(),
            None,
        ),
        RoundPhase::Voting => {
            let member = store.find_participant(battle.id, actor).await?.is_some();
            let votes = store.list_voter_votes(round.id, actor).await?;
            let cast = u8::try_from(votes.len()).unwrap_or(u8::MAX);
            (
                submissions.into_iter().map(SubmissionView::from).collect(),
                votes.into_iter().map(|vote| vote.submission_id).collect(),
                member.then(|| VOTES_PER_ROUND.saturating_sub(cast)),
            )
        }
        RoundPhase::Completed => (
            submissions
                .into_iter()
                .map(SubmissionView::with_tally)
                .collect(),
            Vec::new(),
            None,
        ),
    };

    Ok(CurrentRoundView {
        battle_id: battle.id,
        round: Some(round.into()),
        submissions,
        my_votes,
        votes_remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dto::submission::SubmissionContentRequest,
        services::{
            scheduler, submission_service,
            testing::{Fixture, SUBMISSION_DEADLINE, VOTING_DEADLINE, at, round_input, track},
        },
    };

    fn join(name: &str) -> JoinBattleRequest {
        JoinBattleRequest {
            display_name: name.into(),
        }
    }

    fn private_request() -> CreateBattleRequest {
        CreateBattleRequest {
            name: "Secret".into(),
            visibility: Visibility::Private,
            capacity: 4,
            double_submissions: false,
            display_name: "host".into(),
            first_round: round_input("Openers", 100, 200),
        }
    }

    #[tokio::test]
    async fn creator_joins_and_first_round_opens() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let details = create_battle(&fixture.store, creator, private_request(), at(0))
            .await
            .unwrap();

        assert_eq!(details.battle.participant_count, 1);
        assert_eq!(details.rounds.len(), 1);
        assert_eq!(details.rounds[0].phase, RoundPhase::Submission);
        assert_eq!(details.battle.current_round_id, Some(details.rounds[0].id));
        assert!(
            fixture
                .store
                .find_participant(details.battle.id, creator)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn deadlines_must_be_ordered() {
        let fixture = Fixture::new();
        let mut request = private_request();
        request.first_round = round_input("Backwards", 200, 100);

        let result = create_battle(&fixture.store, Uuid::new_v4(), request, at(0)).await;
        assert!(matches!(
            result,
            Err(ServiceError::Rejected(Rejection::InvariantViolation(_)))
        ));
        assert!(fixture.store.list_battles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_battles_reject_self_join() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = create_battle(&fixture.store, creator, private_request(), at(0))
            .await
            .unwrap()
            .battle
            .id;
        let guest = Uuid::new_v4();

        let result = join_battle(&fixture.store, guest, battle_id, join("guest"), at(1)).await;
        assert!(matches!(
            result,
            Err(ServiceError::Rejected(Rejection::Unauthorized(_)))
        ));

        let hidden = get_battle(&fixture.store, guest, battle_id).await;
        assert!(matches!(
            hidden,
            Err(ServiceError::Rejected(Rejection::NotFound(_)))
        ));
        assert!(
            list_battles(&fixture.store, guest)
                .await
                .unwrap()
                .battles
                .is_empty()
        );

        fixture.enroll(battle_id, creator, guest, "guest").await;
        let visible = get_battle(&fixture.store, guest, battle_id).await.unwrap();
        assert_eq!(visible.participants.len(), 2);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 2, false).await;

        let first = Uuid::new_v4();
        join_battle(&fixture.store, first, battle_id, join("first"), at(1))
            .await
            .unwrap();

        let again = join_battle(&fixture.store, first, battle_id, join("first"), at(2)).await;
        assert!(matches!(
            again,
            Err(ServiceError::Rejected(Rejection::Conflict(_)))
        ));

        let late = join_battle(&fixture.store, Uuid::new_v4(), battle_id, join("late"), at(3)).await;
        assert!(matches!(
            late,
            Err(ServiceError::Rejected(Rejection::InvariantViolation(_)))
        ));

        let battle = fixture.store.find_battle(battle_id).await.unwrap().unwrap();
        assert_eq!(battle.participant_count, 2);
    }

    #[tokio::test]
    async fn only_creator_adds_rounds_in_sequence() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;

        let outsider = add_round(
            &fixture.store,
            Uuid::new_v4(),
            battle_id,
            round_input("Closers", 3_000, 4_000),
            at(5),
        )
        .await;
        assert!(matches!(
            outsider,
            Err(ServiceError::Rejected(Rejection::Unauthorized(_)))
        ));

        let overlapping = add_round(
            &fixture.store,
            creator,
            battle_id,
            round_input("Overlap", 1_500, 4_000),
            at(5),
        )
        .await;
        assert!(matches!(
            overlapping,
            Err(ServiceError::Rejected(Rejection::InvariantViolation(_)))
        ));

        let added = add_round(
            &fixture.store,
            creator,
            battle_id,
            round_input("Closers", 3_000, 4_000),
            at(5),
        )
        .await
        .unwrap();
        assert_eq!(added.round.ordinal, 2);
        assert_eq!(added.round.phase, RoundPhase::Pending);

        let updated = update_round(
            &fixture.store,
            creator,
            added.round.id,
            round_input("Encores", 3_500, 4_500),
            at(6),
        )
        .await
        .unwrap();
        assert_eq!(updated.round.theme, "Encores");
    }

    #[tokio::test]
    async fn schedule_is_locked_once_voting_starts() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;
        let round_id = fixture
            .store
            .find_battle(battle_id)
            .await
            .unwrap()
            .unwrap()
            .current_round_id
            .unwrap();
        scheduler::tick(&fixture.store, &fixture.tasks, at(SUBMISSION_DEADLINE))
            .await
            .unwrap();

        let edit = update_round(
            &fixture.store,
            creator,
            round_id,
            round_input("Late change", 5_000, 6_000),
            at(SUBMISSION_DEADLINE + 1),
        )
        .await;
        assert!(matches!(
            edit,
            Err(ServiceError::Rejected(Rejection::PhaseViolation(_)))
        ));

        let round = fixture.store.find_round(round_id).await.unwrap().unwrap();
        assert_eq!(round.phase, RoundPhase::Voting);
        assert_eq!(round.submission_deadline, at(SUBMISSION_DEADLINE));
        assert_eq!(round.voting_deadline, at(VOTING_DEADLINE));
    }

    #[tokio::test]
    async fn current_round_hides_other_entries_until_voting() {
        let fixture = Fixture::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let battle_id = fixture.battle(alice, 4, false).await;
        fixture.enroll(battle_id, alice, bob, "bob").await;
        let round_id = fixture
            .store
            .find_battle(battle_id)
            .await
            .unwrap()
            .unwrap()
            .current_round_id
            .unwrap();

        for (actor, n) in [(alice, 1), (bob, 2)] {
            submission_service::submit_item(
                &fixture.store,
                actor,
                round_id,
                SubmissionContentRequest { content: track(n) },
                at(10),
            )
            .await
            .unwrap();
        }

        let during_submission = get_current_round(&fixture.store, alice, battle_id)
            .await
            .unwrap();
        assert_eq!(during_submission.submissions.len(), 1);
        assert_eq!(during_submission.submissions[0].submitter_id, alice);
        assert_eq!(during_submission.votes_remaining, None);

        scheduler::tick(&fixture.store, &fixture.tasks, at(SUBMISSION_DEADLINE))
            .await
            .unwrap();

        let during_voting = get_current_round(&fixture.store, alice, battle_id)
            .await
            .unwrap();
        assert_eq!(during_voting.submissions.len(), 2);
        assert!(during_voting.submissions.iter().all(|s| s.tally.is_none()));
        assert_eq!(during_voting.votes_remaining, Some(VOTES_PER_ROUND));
    }
}
