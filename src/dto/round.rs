use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{ArtifactEntity, RoundEntity},
    dto::{
        format_system_time,
        submission::SubmissionView,
        validation::{validate_not_blank, validate_rfc3339},
    },
    state::round_machine::RoundPhase,
};

/// Theme and deadlines of a round, used on creation and update.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct RoundInput {
    #[validate(length(min = 1, max = 120), custom(function = "validate_not_blank"))]
    pub theme: String,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: String,
    /// RFC 3339 timestamp.
    #[validate(custom(function = "validate_rfc3339"))]
    pub submission_deadline: String,
    /// RFC 3339 timestamp, strictly after the submission deadline.
    #[validate(custom(function = "validate_rfc3339"))]
    pub voting_deadline: String,
}

/// Public outcome of the artifact generation.
#[derive(Debug, Serialize, ToSchema, Clone)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactView {
    Ready { url: String, generated_at: String },
    Failed { reason: String, failed_at: String },
}

impl From<ArtifactEntity> for ArtifactView {
    fn from(artifact: ArtifactEntity) -> Self {
        match artifact {
            ArtifactEntity::Ready { url, generated_at } => ArtifactView::Ready {
                url,
                generated_at: format_system_time(generated_at),
            },
            ArtifactEntity::Failed { reason, failed_at } => ArtifactView::Failed {
                reason,
                failed_at: format_system_time(failed_at),
            },
        }
    }
}

/// Round snapshot exposed to callers.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct RoundSummary {
    pub id: Uuid,
    pub battle_id: Uuid,
    pub ordinal: u32,
    pub theme: String,
    pub description: String,
    pub phase: RoundPhase,
    pub submission_deadline: String,
    pub voting_deadline: String,
    pub winner_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<RoundEntity> for RoundSummary {
    fn from(round: RoundEntity) -> Self {
        Self {
            id: round.id,
            battle_id: round.battle_id,
            ordinal: round.ordinal,
            theme: round.theme,
            description: round.description,
            phase: round.phase,
            submission_deadline: format_system_time(round.submission_deadline),
            voting_deadline: format_system_time(round.voting_deadline),
            winner_ids: round.winner_ids,
            artifact: round.artifact.map(Into::into),
            completed_at: round.completed_at.map(format_system_time),
        }
    }
}

/// Round payload returned by create/update operations.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundEnvelope {
    pub round: RoundSummary,
}

/// What the actor sees of the battle's current round.
///
/// During submission only the actor's own entries are listed; during voting every
/// entry is listed without tallies.
#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentRoundView {
    pub battle_id: Uuid,
    /// Absent once the battle completed.
    pub round: Option<RoundSummary>,
    pub submissions: Vec<SubmissionView>,
    /// Submissions the actor starred, one entry per star.
    pub my_votes: Vec<Uuid>,
    /// Stars the actor may still cast; present during voting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes_remaining: Option<u8>,
}

/// One participant's line in the round results.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct StandingView {
    pub user_id: Uuid,
    pub display_name: String,
    pub credits: u32,
    pub winner: bool,
}

/// Final results of a completed round.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundResultsView {
    pub round: RoundSummary,
    /// Ordered by descending credits.
    pub standings: Vec<StandingView>,
    /// Ordered by descending tally.
    pub submissions: Vec<SubmissionView>,
}

/// Response of a manual artifact retry.
#[derive(Debug, Serialize, ToSchema)]
pub struct ArtifactRetryView {
    pub round_id: Uuid,
    pub queued: bool,
}
