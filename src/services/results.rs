use std::cmp::Reverse;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{ParticipantEntity, SubmissionEntity},
    },
    dto::{
        round::{RoundResultsView, StandingView},
        submission::SubmissionView,
    },
    error::{Rejection, ServiceError},
    services::guards::load_round,
    state::round_machine::RoundPhase,
};

/// Credits received in a round, per participant, in membership order.
///
/// Participants without submissions appear with zero credits. Submissions of users
/// that are no longer members are still counted.
pub fn round_credits(
    participants: &[ParticipantEntity],
    submissions: &[SubmissionEntity],
) -> IndexMap<Uuid, u32> {
    let mut credits: IndexMap<Uuid, u32> = participants
        .iter()
        .map(|participant| (participant.user_id, 0))
        .collect();
    for submission in submissions {
        *credits.entry(submission.submitter_id).or_default() += submission.tally;
    }
    credits
}

/// Every key holding the maximum value, ties included.
pub fn leaders(totals: &IndexMap<Uuid, u32>) -> Vec<Uuid> {
    let Some(max) = totals.values().copied().max() else {
        return Vec::new();
    };
    totals
        .iter()
        .filter(|(_, credits)| **credits == max)
        .map(|(user_id, _)| *user_id)
        .collect()
}

/// Final standings of a completed round.
pub async fn get_round_results(
    store: &dyn BattleStore,
    round_id: Uuid,
) -> Result<RoundResultsView, ServiceError> {
    let round = load_round(store, round_id).await?;
    if round.phase != RoundPhase::Completed {
        return Err(Rejection::PhaseViolation(format!(
            "results of round {} are not available yet (phase: {})",
            round.ordinal,
            round.phase.as_str()
        ))
        .into());
    }

    let participants = store.list_participants(round.battle_id).await?;
    let mut submissions = store.list_submissions(round.id).await?;
    let credits = round_credits(&participants, &submissions);

    let mut standings: Vec<StandingView> = credits
        .iter()
        .map(|(user_id, credits)| StandingView {
            user_id: *user_id,
            display_name: participants
                .iter()
                .find(|participant| participant.user_id == *user_id)
                .map(|participant| participant.display_name.clone())
                .unwrap_or_default(),
            credits: *credits,
            winner: round.winner_ids.contains(user_id),
        })
        .collect();
    standings.sort_by_key(|standing| Reverse(standing.credits));

    submissions.sort_by_key(|submission| (Reverse(submission.tally), submission.submitted_at));

    Ok(RoundResultsView {
        round: round.into(),
        standings,
        submissions: submissions
            .into_iter()
            .map(SubmissionView::with_tally)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn participant(user_id: Uuid) -> ParticipantEntity {
        ParticipantEntity {
            battle_id: Uuid::nil(),
            user_id,
            display_name: "p".into(),
            joined_at: SystemTime::UNIX_EPOCH,
            total_credits: 0,
            rounds_won: 0,
        }
    }

    fn submission(submitter_id: Uuid, tally: u32) -> SubmissionEntity {
        SubmissionEntity {
            id: Uuid::new_v4(),
            round_id: Uuid::nil(),
            battle_id: Uuid::nil(),
            submitter_id,
            content_ref: String::new(),
            content_key: Uuid::new_v4().to_string(),
            order: 1,
            submitted_at: SystemTime::UNIX_EPOCH,
            tally,
        }
    }

    #[test]
    fn credits_sum_both_entries() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let credits = round_credits(
            &[participant(a), participant(b), participant(c)],
            &[submission(a, 2), submission(a, 1), submission(b, 3)],
        );

        assert_eq!(credits[&a], 3);
        assert_eq!(credits[&b], 3);
        assert_eq!(credits[&c], 0);
        assert_eq!(leaders(&credits), vec![a, b]);
    }

    #[test]
    fn zero_maximum_is_a_tie_between_everyone() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let credits = round_credits(&[participant(a), participant(b)], &[submission(a, 0)]);
        assert_eq!(leaders(&credits), vec![a, b]);
        assert!(leaders(&IndexMap::new()).is_empty());
    }

    #[test]
    fn single_leader() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let credits = round_credits(
            &[participant(a), participant(b)],
            &[submission(a, 1), submission(b, 5)],
        );
        assert_eq!(leaders(&credits), vec![b]);
    }
}
