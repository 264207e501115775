use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{BattleEntity, BattleStatus, ParticipantEntity, Visibility},
    dto::{
        format_system_time,
        round::{RoundInput, RoundSummary},
        validation::validate_not_blank,
    },
};

/// Payload used to open a new battle together with its first round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateBattleRequest {
    #[validate(length(min = 1, max = 80), custom(function = "validate_not_blank"))]
    pub name: String,
    pub visibility: Visibility,
    /// Maximum number of participants, creator included.
    #[validate(range(min = 2, max = 64))]
    pub capacity: u32,
    /// Allow two entries per participant and round.
    #[serde(default)]
    pub double_submissions: bool,
    /// Name the creator is shown under.
    #[validate(length(min = 1, max = 40), custom(function = "validate_not_blank"))]
    pub display_name: String,
    #[validate(nested)]
    pub first_round: RoundInput,
}

/// Payload used to join a public battle.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinBattleRequest {
    #[validate(length(min = 1, max = 40), custom(function = "validate_not_blank"))]
    pub display_name: String,
}

/// Payload used by a creator to enroll a user.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct EnrollParticipantRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 40), custom(function = "validate_not_blank"))]
    pub display_name: String,
}

/// Battle fields shared by listings and detail views.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct BattleSummary {
    pub id: Uuid,
    pub name: String,
    pub creator_id: Uuid,
    pub visibility: Visibility,
    pub capacity: u32,
    pub double_submissions: bool,
    pub status: BattleStatus,
    pub current_round_id: Option<Uuid>,
    pub participant_count: u32,
    /// Filled once the battle completed.
    pub champion_ids: Vec<Uuid>,
    pub created_at: String,
}

impl From<BattleEntity> for BattleSummary {
    fn from(battle: BattleEntity) -> Self {
        Self {
            id: battle.id,
            name: battle.name,
            creator_id: battle.creator_id,
            visibility: battle.visibility,
            capacity: battle.capacity,
            double_submissions: battle.double_submissions,
            status: battle.status,
            current_round_id: battle.current_round_id,
            participant_count: battle.participant_count,
            champion_ids: battle.champion_ids,
            created_at: format_system_time(battle.created_at),
        }
    }
}

/// Participant standings within a battle.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct ParticipantView {
    pub user_id: Uuid,
    pub display_name: String,
    pub joined_at: String,
    pub total_credits: u32,
    pub rounds_won: u32,
}

impl From<ParticipantEntity> for ParticipantView {
    fn from(participant: ParticipantEntity) -> Self {
        Self {
            user_id: participant.user_id,
            display_name: participant.display_name,
            joined_at: format_system_time(participant.joined_at),
            total_credits: participant.total_credits,
            rounds_won: participant.rounds_won,
        }
    }
}

/// Battle with its rounds and participants.
#[derive(Debug, Serialize, ToSchema)]
pub struct BattleDetails {
    pub battle: BattleSummary,
    pub rounds: Vec<RoundSummary>,
    pub participants: Vec<ParticipantView>,
}

/// Listing payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct BattleList {
    pub battles: Vec<BattleSummary>,
}

/// Participant record returned after joining or enrolling.
#[derive(Debug, Serialize, ToSchema)]
pub struct MembershipView {
    pub battle_id: Uuid,
    pub participant: ParticipantView,
}
