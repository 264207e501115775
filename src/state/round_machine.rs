use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::RoundEntity;

/// Lifecycle phases of a single battle round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Round exists but an earlier round is still running.
    Pending,
    /// Participants may submit, edit and remove entries.
    Submission,
    /// Participants allocate their stars.
    Voting,
    /// Results are final; the round never changes phase again.
    Completed,
}

impl RoundPhase {
    /// Rounds the scheduler has to look at.
    pub fn is_in_flight(self) -> bool {
        matches!(self, RoundPhase::Submission | RoundPhase::Voting)
    }

    /// Stable lowercase label used in logs and storage queries.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Pending => "pending",
            RoundPhase::Submission => "submission",
            RoundPhase::Voting => "voting",
            RoundPhase::Completed => "completed",
        }
    }
}

/// Why a voting window was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// The voting deadline was observed.
    DeadlineReached,
    /// Every participant spent all of their stars.
    AllVotesCast,
}

/// Events that move a round forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// The round becomes the battle's current round.
    Activate,
    /// The submission deadline passed.
    BeginVoting,
    /// Voting is over.
    Complete(CompletionReason),
}

/// Error returned when an event does not apply to the round's phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the round was in.
    pub from: RoundPhase,
    /// Rejected event.
    pub event: RoundEvent,
}

/// A validated transition, applied by the store as a compare-and-set on the
/// round's phase and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Round being transitioned.
    pub round_id: Uuid,
    /// Phase the round must still be in.
    pub from: RoundPhase,
    /// Phase written on success.
    pub to: RoundPhase,
    /// Event that produced the plan.
    pub event: RoundEvent,
    /// Version the round must still carry.
    pub version: u64,
    /// Version written on success.
    pub version_next: u64,
}

/// Plan `event` against the round's current phase and version.
pub fn plan(round: &RoundEntity, event: RoundEvent) -> Result<TransitionPlan, InvalidTransition> {
    let to = compute_transition(round.phase, event)?;
    Ok(TransitionPlan {
        round_id: round.id,
        from: round.phase,
        to,
        event,
        version: round.version,
        version_next: round.version + 1,
    })
}

fn compute_transition(from: RoundPhase, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
    let next = match (from, event) {
        (RoundPhase::Pending, RoundEvent::Activate) => RoundPhase::Submission,
        (RoundPhase::Submission, RoundEvent::BeginVoting) => RoundPhase::Voting,
        (RoundPhase::Voting, RoundEvent::Complete(_)) => RoundPhase::Completed,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn round(phase: RoundPhase, version: u64) -> RoundEntity {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        RoundEntity {
            id: Uuid::new_v4(),
            battle_id: Uuid::new_v4(),
            ordinal: 1,
            theme: "Openers".into(),
            description: String::new(),
            submission_deadline: now,
            voting_deadline: now + Duration::from_secs(60),
            phase,
            version,
            winner_ids: Vec::new(),
            artifact: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn full_lifecycle_is_linear() {
        let mut current = round(RoundPhase::Pending, 0);
        for (event, expected) in [
            (RoundEvent::Activate, RoundPhase::Submission),
            (RoundEvent::BeginVoting, RoundPhase::Voting),
            (
                RoundEvent::Complete(CompletionReason::DeadlineReached),
                RoundPhase::Completed,
            ),
        ] {
            let plan = plan(&current, event).unwrap();
            assert_eq!(plan.to, expected);
            assert_eq!(plan.version_next, current.version + 1);
            current.phase = plan.to;
            current.version = plan.version_next;
        }
        assert_eq!(current.version, 3);
    }

    #[test]
    fn completed_round_rejects_every_event() {
        let completed = round(RoundPhase::Completed, 7);
        for event in [
            RoundEvent::Activate,
            RoundEvent::BeginVoting,
            RoundEvent::Complete(CompletionReason::AllVotesCast),
        ] {
            let err = plan(&completed, event).unwrap_err();
            assert_eq!(err.from, RoundPhase::Completed);
            assert_eq!(err.event, event);
        }
    }

    #[test]
    fn no_back_transitions() {
        let voting = round(RoundPhase::Voting, 2);
        assert!(plan(&voting, RoundEvent::BeginVoting).is_err());
        assert!(plan(&voting, RoundEvent::Activate).is_err());

        let submission = round(RoundPhase::Submission, 1);
        assert!(plan(&submission, RoundEvent::Complete(CompletionReason::AllVotesCast)).is_err());
    }

    #[test]
    fn only_submission_and_voting_are_in_flight() {
        assert!(!RoundPhase::Pending.is_in_flight());
        assert!(RoundPhase::Submission.is_in_flight());
        assert!(RoundPhase::Voting.is_in_flight());
        assert!(!RoundPhase::Completed.is_in_flight());
    }
}
