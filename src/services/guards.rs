//! Lookups and gating checks shared by the battle, submission and vote services.

use std::time::SystemTime;

use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{BattleEntity, ParticipantEntity, RoundEntity, SubmissionEntity},
    },
    error::{Rejection, ServiceError},
    state::round_machine::RoundPhase,
};

pub async fn load_battle(store: &dyn BattleStore, id: Uuid) -> Result<BattleEntity, ServiceError> {
    store
        .find_battle(id)
        .await?
        .ok_or_else(|| Rejection::NotFound(format!("battle `{id}` not found")).into())
}

pub async fn load_round(store: &dyn BattleStore, id: Uuid) -> Result<RoundEntity, ServiceError> {
    store
        .find_round(id)
        .await?
        .ok_or_else(|| Rejection::NotFound(format!("round `{id}` not found")).into())
}

pub async fn load_submission(
    store: &dyn BattleStore,
    id: Uuid,
) -> Result<SubmissionEntity, ServiceError> {
    store
        .find_submission(id)
        .await?
        .ok_or_else(|| Rejection::NotFound(format!("submission `{id}` not found")).into())
}

/// Membership record of `user_id`, or an authorization rejection.
pub async fn require_participant(
    store: &dyn BattleStore,
    battle_id: Uuid,
    user_id: Uuid,
) -> Result<ParticipantEntity, ServiceError> {
    store
        .find_participant(battle_id, user_id)
        .await?
        .ok_or_else(|| {
            Rejection::Unauthorized("you are not a participant in this battle".into()).into()
        })
}

pub fn require_creator(battle: &BattleEntity, actor: Uuid, action: &str) -> Result<(), Rejection> {
    if battle.creator_id != actor {
        return Err(Rejection::Unauthorized(format!(
            "only the battle creator can {action}"
        )));
    }
    Ok(())
}

/// Entries may only change while the round accepts submissions.
pub fn ensure_submission_window(round: &RoundEntity, now: SystemTime) -> Result<(), Rejection> {
    if round.phase != RoundPhase::Submission {
        return Err(Rejection::PhaseViolation(format!(
            "round {} is not accepting submissions (phase: {})",
            round.ordinal,
            round.phase.as_str()
        )));
    }
    if now > round.submission_deadline {
        return Err(Rejection::PhaseViolation(
            "the submission deadline has passed".into(),
        ));
    }
    Ok(())
}

/// Stars may only change while the round is in voting.
pub fn ensure_voting_window(round: &RoundEntity, now: SystemTime) -> Result<(), Rejection> {
    if round.phase != RoundPhase::Voting {
        return Err(Rejection::PhaseViolation(format!(
            "voting is not open for round {} (phase: {})",
            round.ordinal,
            round.phase.as_str()
        )));
    }
    if now > round.voting_deadline {
        return Err(Rejection::PhaseViolation(
            "the voting deadline has passed".into(),
        ));
    }
    Ok(())
}

/// Deadlines must be strictly ordered.
pub fn ensure_deadline_order(
    submission_deadline: SystemTime,
    voting_deadline: SystemTime,
) -> Result<(), Rejection> {
    if voting_deadline <= submission_deadline {
        return Err(Rejection::InvariantViolation(
            "the voting deadline must be after the submission deadline".into(),
        ));
    }
    Ok(())
}
