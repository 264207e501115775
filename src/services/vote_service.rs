use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{VoteEntity, VoteWrite},
    },
    dto::vote::VoteReceipt,
    error::{Rejection, ServiceError},
    services::guards::{ensure_voting_window, load_round, load_submission, require_participant},
    state::dispatch::EvaluationHints,
};

/// Stars each participant may cast per round.
pub const VOTES_PER_ROUND: u8 = 3;

fn remaining(cast: usize) -> u8 {
    let cast = u8::try_from(cast).unwrap_or(u8::MAX);
    VOTES_PER_ROUND.saturating_sub(cast)
}

/// Give one star to a submission.
pub async fn award_vote(
    store: &dyn BattleStore,
    hints: &EvaluationHints,
    actor: Uuid,
    submission_id: Uuid,
    now: SystemTime,
) -> Result<VoteReceipt, ServiceError> {
    let submission = load_submission(store, submission_id).await?;
    let round = load_round(store, submission.round_id).await?;
    ensure_voting_window(&round, now)?;
    require_participant(store, round.battle_id, actor).await?;

    if submission.submitter_id == actor {
        return Err(
            Rejection::Unauthorized("you cannot vote for your own submission".into()).into(),
        );
    }

    let cast = store.list_voter_votes(round.id, actor).await?;
    if cast.len() >= usize::from(VOTES_PER_ROUND) {
        return Err(Rejection::QuotaExceeded("no votes remaining for this round".into()).into());
    }
    let slot = (1..=VOTES_PER_ROUND)
        .find(|slot| cast.iter().all(|vote| vote.slot != *slot))
        .ok_or_else(|| Rejection::QuotaExceeded("no votes remaining for this round".into()))?;

    let vote = VoteEntity {
        id: Uuid::new_v4(),
        round_id: round.id,
        voter_id: actor,
        submission_id: submission.id,
        slot,
        cast_at: now,
    };

    match store.insert_vote(vote).await? {
        VoteWrite::Applied { .. } => {
            hints.notify(round.id);
            info!(round_id = %round.id, submission_id = %submission.id, slot, "vote recorded");
            Ok(VoteReceipt {
                round_id: round.id,
                submission_id: submission.id,
                votes_remaining: remaining(cast.len() + 1),
            })
        }
        VoteWrite::RoundClosed => {
            Err(Rejection::PhaseViolation("voting closed for this round".into()).into())
        }
        VoteWrite::SlotTaken => Err(Rejection::Conflict(
            "another vote was recorded at the same time; please retry".into(),
        )
        .into()),
        VoteWrite::NotFound => {
            Err(Rejection::NotFound(format!("submission `{submission_id}` not found")).into())
        }
    }
}

/// Take back the most recent star the actor gave to a submission.
pub async fn remove_vote(
    store: &dyn BattleStore,
    hints: &EvaluationHints,
    actor: Uuid,
    submission_id: Uuid,
    now: SystemTime,
) -> Result<VoteReceipt, ServiceError> {
    let submission = load_submission(store, submission_id).await?;
    let round = load_round(store, submission.round_id).await?;
    ensure_voting_window(&round, now)?;
    require_participant(store, round.battle_id, actor).await?;

    match store.delete_vote(round.id, actor, submission.id).await? {
        VoteWrite::Applied { .. } => {
            hints.notify(round.id);
            let cast = store.count_voter_votes(round.id, actor).await?;
            info!(round_id = %round.id, submission_id = %submission.id, "vote removed");
            Ok(VoteReceipt {
                round_id: round.id,
                submission_id: submission.id,
                votes_remaining: remaining(cast),
            })
        }
        VoteWrite::RoundClosed => {
            Err(Rejection::PhaseViolation("voting closed for this round".into()).into())
        }
        VoteWrite::NotFound => Err(Rejection::Conflict(
            "you have not voted for this submission".into(),
        )
        .into()),
        VoteWrite::SlotTaken => Err(ServiceError::Internal(
            "vote removal reported a slot conflict".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dto::submission::SubmissionContentRequest,
        services::{
            scheduler, submission_service,
            testing::{Fixture, SUBMISSION_DEADLINE, VOTING_DEADLINE, at, track},
        },
        state::round_machine::RoundPhase,
    };

    struct Voting {
        fixture: Fixture,
        creator: Uuid,
        rival: Uuid,
        round_id: Uuid,
        creator_entry: Uuid,
        rival_entry: Uuid,
    }

    async fn voting_round() -> Voting {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let rival = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;
        fixture.enroll(battle_id, creator, rival, "rival").await;
        let round_id = fixture
            .store
            .find_battle(battle_id)
            .await
            .unwrap()
            .unwrap()
            .current_round_id
            .unwrap();

        let submit = |actor, n| {
            submission_service::submit_item(
                &fixture.store,
                actor,
                round_id,
                SubmissionContentRequest { content: track(n) },
                at(10),
            )
        };
        let creator_entry = submit(creator, 1).await.unwrap().id;
        let rival_entry = submit(rival, 2).await.unwrap().id;

        scheduler::tick(&fixture.store, &fixture.tasks, at(SUBMISSION_DEADLINE))
            .await
            .unwrap();
        let round = fixture.store.find_round(round_id).await.unwrap().unwrap();
        assert_eq!(round.phase, RoundPhase::Voting);

        Voting {
            fixture,
            creator,
            rival,
            round_id,
            creator_entry,
            rival_entry,
        }
    }

    async fn tally(fixture: &Fixture, submission_id: Uuid) -> u32 {
        fixture
            .store
            .find_submission(submission_id)
            .await
            .unwrap()
            .unwrap()
            .tally
    }

    #[tokio::test]
    async fn fourth_vote_is_rejected_and_tally_unchanged() {
        let v = voting_round().await;
        let store = &v.fixture.store;
        let hints = &v.fixture.hints;

        for expected_remaining in [2, 1, 0] {
            let receipt = award_vote(store, hints, v.rival, v.creator_entry, at(1_500))
                .await
                .unwrap();
            assert_eq!(receipt.votes_remaining, expected_remaining);
        }
        assert_eq!(tally(&v.fixture, v.creator_entry).await, 3);

        let fourth = award_vote(store, hints, v.rival, v.creator_entry, at(1_501)).await;
        assert!(matches!(
            fourth,
            Err(ServiceError::Rejected(Rejection::QuotaExceeded(message)))
                if message == "no votes remaining for this round"
        ));
        assert_eq!(tally(&v.fixture, v.creator_entry).await, 3);
        assert_eq!(
            store.count_voter_votes(v.round_id, v.rival).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn self_vote_is_rejected() {
        let v = voting_round().await;
        let result = award_vote(
            &v.fixture.store,
            &v.fixture.hints,
            v.creator,
            v.creator_entry,
            at(1_500),
        )
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::Rejected(Rejection::Unauthorized(_)))
        ));
        assert_eq!(tally(&v.fixture, v.creator_entry).await, 0);
    }

    #[tokio::test]
    async fn removing_a_vote_restores_the_credit() {
        let v = voting_round().await;
        let store = &v.fixture.store;
        let hints = &v.fixture.hints;

        award_vote(store, hints, v.creator, v.rival_entry, at(1_500))
            .await
            .unwrap();
        award_vote(store, hints, v.creator, v.rival_entry, at(1_501))
            .await
            .unwrap();

        let receipt = remove_vote(store, hints, v.creator, v.rival_entry, at(1_502))
            .await
            .unwrap();
        assert_eq!(receipt.votes_remaining, 2);
        assert_eq!(tally(&v.fixture, v.rival_entry).await, 1);

        let missing = remove_vote(store, hints, v.rival, v.creator_entry, at(1_503)).await;
        assert!(matches!(
            missing,
            Err(ServiceError::Rejected(Rejection::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn votes_after_deadline_are_rejected() {
        let v = voting_round().await;
        let result = award_vote(
            &v.fixture.store,
            &v.fixture.hints,
            v.rival,
            v.creator_entry,
            at(VOTING_DEADLINE + 1),
        )
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::Rejected(Rejection::PhaseViolation(_)))
        ));
        assert_eq!(tally(&v.fixture, v.creator_entry).await, 0);
    }

    #[tokio::test]
    async fn votes_send_an_evaluation_hint() {
        let mut v = voting_round().await;
        award_vote(
            &v.fixture.store,
            &v.fixture.hints,
            v.rival,
            v.creator_entry,
            at(1_500),
        )
        .await
        .unwrap();

        assert_eq!(v.fixture.hint_rx.recv().await, Some(v.round_id));
    }

    #[tokio::test]
    async fn concurrent_votes_respect_the_cap_and_keep_the_tally_exact() {
        let v = voting_round().await;
        let store = &v.fixture.store;
        let hints = &v.fixture.hints;

        let outcomes = tokio::join!(
            award_vote(store, hints, v.rival, v.creator_entry, at(1_100)),
            award_vote(store, hints, v.rival, v.creator_entry, at(1_100)),
            award_vote(store, hints, v.rival, v.creator_entry, at(1_100)),
            award_vote(store, hints, v.rival, v.creator_entry, at(1_100)),
        );
        let accepted = [
            outcomes.0.is_ok(),
            outcomes.1.is_ok(),
            outcomes.2.is_ok(),
            outcomes.3.is_ok(),
        ]
        .iter()
        .filter(|ok| **ok)
        .count();

        let cast = store.count_voter_votes(v.round_id, v.rival).await.unwrap();
        assert!(cast <= usize::from(VOTES_PER_ROUND));
        assert_eq!(cast, accepted);
        let stored = store.list_submission_votes(v.creator_entry).await.unwrap();
        assert_eq!(tally(&v.fixture, v.creator_entry).await as usize, stored.len());
        assert_eq!(stored.len(), cast);
    }
}
