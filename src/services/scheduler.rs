//! Deadline and completion driven round transitions.
//!
//! A tick scans every round in submission or voting and applies whatever
//! transition is due. Each transition is planned against the round read at the
//! start of the evaluation and applied by the store as a compare-and-set, so
//! overlapping ticks and hints never apply the same transition twice.

use std::{future, time::SystemTime};

use indexmap::IndexMap;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{Advancement, RoundCompletion, RoundEntity},
    },
    dto::scheduler::{TickReport, TransitionRecord},
    error::ServiceError,
    services::{artifacts, results, vote_service::VOTES_PER_ROUND},
    state::{
        SharedState,
        dispatch::{HintReceiver, TaskQueue},
        round_machine::{self, CompletionReason, RoundEvent, RoundPhase, TransitionPlan},
    },
};

/// Evaluate every in-flight round once.
///
/// Failures are counted and logged; the round is picked up again on the next tick.
pub async fn tick(
    store: &dyn BattleStore,
    tasks: &TaskQueue,
    now: SystemTime,
) -> Result<TickReport, ServiceError> {
    let rounds = store.list_in_flight_rounds().await?;
    let mut report = TickReport {
        scanned: rounds.len(),
        ..TickReport::default()
    };

    for round in rounds {
        let round_id = round.id;
        match evaluate_round(store, tasks, round, now).await {
            Ok(applied) => report.transitions.extend(applied),
            Err(err) => {
                warn!(round_id = %round_id, error = %err, "round evaluation failed; retrying next tick");
                report.failures += 1;
            }
        }
    }

    if !report.transitions.is_empty() || report.failures > 0 {
        info!(
            scanned = report.scanned,
            transitions = report.transitions.len(),
            failures = report.failures,
            "scheduler tick finished"
        );
    }
    Ok(report)
}

/// Re-read a round and evaluate it; unknown or idle rounds are ignored.
pub async fn evaluate_round_by_id(
    store: &dyn BattleStore,
    tasks: &TaskQueue,
    round_id: Uuid,
    now: SystemTime,
) -> Result<Vec<TransitionRecord>, ServiceError> {
    match store.find_round(round_id).await? {
        Some(round) if round.phase.is_in_flight() => evaluate_round(store, tasks, round, now).await,
        _ => Ok(Vec::new()),
    }
}

/// Apply every transition due for `round` at `now`.
pub async fn evaluate_round(
    store: &dyn BattleStore,
    tasks: &TaskQueue,
    round: RoundEntity,
    now: SystemTime,
) -> Result<Vec<TransitionRecord>, ServiceError> {
    let mut applied = Vec::new();
    let mut round = round;

    if round.phase == RoundPhase::Submission {
        if now < round.submission_deadline {
            return Ok(applied);
        }
        let Some(record) = begin_voting(store, tasks, &round).await? else {
            return Ok(applied);
        };
        applied.push(record);
        round = match store.find_round(round.id).await? {
            Some(round) => round,
            None => return Ok(applied),
        };
    }

    if round.phase == RoundPhase::Voting {
        let reason = if now >= round.voting_deadline {
            Some(CompletionReason::DeadlineReached)
        } else if all_votes_cast(store, &round).await? {
            Some(CompletionReason::AllVotesCast)
        } else {
            None
        };
        if let Some(reason) = reason {
            applied.extend(complete_round(store, &round, reason, now).await?);
        }
    }

    Ok(applied)
}

fn record(round: &RoundEntity, plan: &TransitionPlan) -> TransitionRecord {
    TransitionRecord {
        round_id: plan.round_id,
        battle_id: round.battle_id,
        from: plan.from,
        to: plan.to,
    }
}

/// Close submissions and hand the final entry list to the artifact worker.
async fn begin_voting(
    store: &dyn BattleStore,
    tasks: &TaskQueue,
    round: &RoundEntity,
) -> Result<Option<TransitionRecord>, ServiceError> {
    let plan = round_machine::plan(round, RoundEvent::BeginVoting)?;
    if !store.apply_round_transition(plan.clone()).await? {
        debug!(round_id = %round.id, "round moved on before voting could open");
        return Ok(None);
    }
    info!(round_id = %round.id, ordinal = round.ordinal, "voting opened");

    let submissions = store.list_submissions(round.id).await?;
    tasks.dispatch(artifacts::build_task(round, submissions));

    Ok(Some(record(round, &plan)))
}

/// True once every current participant spent all of their stars.
async fn all_votes_cast(store: &dyn BattleStore, round: &RoundEntity) -> Result<bool, ServiceError> {
    let participants = store.list_participants(round.battle_id).await?;
    if participants.is_empty() {
        return Ok(false);
    }
    for participant in participants {
        let cast = store.count_voter_votes(round.id, participant.user_id).await?;
        if cast != usize::from(VOTES_PER_ROUND) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Close voting, credit the participants and advance the battle in one store write.
async fn complete_round(
    store: &dyn BattleStore,
    round: &RoundEntity,
    reason: CompletionReason,
    now: SystemTime,
) -> Result<Vec<TransitionRecord>, ServiceError> {
    let plan = round_machine::plan(round, RoundEvent::Complete(reason))?;

    let participants = store.list_participants(round.battle_id).await?;
    let submissions = store.list_submissions(round.id).await?;
    let credits = results::round_credits(&participants, &submissions);
    // Nothing was entered, so nobody can win the round.
    let winner_ids = if submissions.is_empty() {
        Vec::new()
    } else {
        results::leaders(&credits)
    };

    let next = store
        .find_round_by_ordinal(round.battle_id, round.ordinal + 1)
        .await?;
    let advancement = match &next {
        Some(next) => Advancement::Activate(round_machine::plan(next, RoundEvent::Activate)?),
        None => {
            let totals: IndexMap<Uuid, u32> = participants
                .iter()
                .map(|participant| {
                    let earned = credits.get(&participant.user_id).copied().unwrap_or(0);
                    (participant.user_id, participant.total_credits + earned)
                })
                .collect();
            Advancement::FinishBattle {
                champion_ids: results::leaders(&totals),
            }
        }
    };

    let completion = RoundCompletion {
        plan: plan.clone(),
        battle_id: round.battle_id,
        ordinal: round.ordinal,
        credits: credits
            .iter()
            .filter(|(_, credits)| **credits > 0)
            .map(|(user_id, credits)| (*user_id, *credits))
            .collect(),
        winner_ids: winner_ids.clone(),
        advancement: advancement.clone(),
        completed_at: now,
    };
    if !store.commit_round_completion(completion).await? {
        debug!(round_id = %round.id, "round changed while completing; skipped");
        return Ok(Vec::new());
    }

    info!(
        round_id = %round.id,
        ordinal = round.ordinal,
        ?reason,
        winners = winner_ids.len(),
        "round completed"
    );

    let mut applied = vec![record(round, &plan)];
    match (advancement, next) {
        (Advancement::Activate(activation), Some(next)) => {
            info!(round_id = %next.id, ordinal = next.ordinal, "next round activated");
            applied.push(record(&next, &activation));
        }
        (Advancement::FinishBattle { champion_ids }, _) => {
            info!(battle_id = %round.battle_id, champions = champion_ids.len(), "battle completed");
        }
        (Advancement::Activate(_), None) => {}
    }
    Ok(applied)
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Run one tick against the installed store at the current time.
pub async fn trigger_tick(state: &SharedState) -> Result<TickReport, ServiceError> {
    let store = state.require_battle_store().await?;
    tick(store.as_ref(), state.artifact_tasks(), SystemTime::now()).await
}

async fn evaluate_hint(state: &SharedState, round_id: Uuid) {
    let Ok(store) = state.require_battle_store().await else {
        debug!(round_id = %round_id, "hint ignored in degraded mode");
        return;
    };
    if let Err(err) =
        evaluate_round_by_id(store.as_ref(), state.artifact_tasks(), round_id, SystemTime::now())
            .await
    {
        warn!(round_id = %round_id, error = %err, "hinted round evaluation failed");
    }
}

/// Drive the periodic tick and the evaluation hints until both sources are gone.
pub async fn run(state: SharedState, mut hints: HintReceiver) {
    let mut interval = state.config().scheduler().tick_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut hints_open = true;

    if interval.is_none() {
        info!("periodic scheduler tick disabled; relying on external triggers and hints");
    }

    loop {
        if interval.is_none() && !hints_open {
            break;
        }
        tokio::select! {
            _ = next_tick(&mut interval) => {
                if let Err(err) = trigger_tick(&state).await {
                    warn!(error = %err, "scheduler tick skipped");
                }
            }
            hint = hints.recv(), if hints_open => match hint {
                Some(round_id) => evaluate_hint(&state, round_id).await,
                None => hints_open = false,
            },
        }
    }
}
