use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::round_machine::{RoundPhase, TransitionPlan};

/// Who may discover and join a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Anyone can join while seats remain.
    Public,
    /// Only the creator can enroll participants.
    Private,
}

/// Overall status of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    /// Rounds are still being played.
    Active,
    /// The last round completed; irreversible.
    Completed,
}

/// Battle aggregate persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BattleEntity {
    /// Primary key of the battle.
    pub id: Uuid,
    /// Display name of the battle.
    pub name: String,
    /// User that created the battle and may append rounds.
    pub creator_id: Uuid,
    pub visibility: Visibility,
    /// Maximum number of participants.
    pub capacity: u32,
    /// Whether each participant may submit two entries per round.
    pub double_submissions: bool,
    pub status: BattleStatus,
    /// Round currently in submission or voting, if any.
    pub current_round_id: Option<Uuid>,
    /// Number of participant records, kept alongside the capacity check.
    pub participant_count: u32,
    /// Participants with the highest cumulative credits once the battle completed.
    pub champion_ids: Vec<Uuid>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Outcome of the playlist generation triggered when voting opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactEntity {
    /// Generation succeeded and produced a reference.
    Ready {
        /// Location of the generated artifact.
        url: String,
        generated_at: SystemTime,
    },
    /// Every attempt failed; can be retried.
    Failed {
        /// Last failure reported by the generator.
        reason: String,
        failed_at: SystemTime,
    },
}

impl ArtifactEntity {
    /// True once a usable artifact exists.
    pub fn is_ready(&self) -> bool {
        matches!(self, ArtifactEntity::Ready { .. })
    }
}

/// One round of one battle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundEntity {
    /// Primary key of the round.
    pub id: Uuid,
    pub battle_id: Uuid,
    /// 1-based position inside the battle.
    pub ordinal: u32,
    pub theme: String,
    pub description: String,
    pub submission_deadline: SystemTime,
    pub voting_deadline: SystemTime,
    pub phase: RoundPhase,
    /// Revision bumped by every ledger write and phase transition.
    pub version: u64,
    /// Participants tied at the highest credit total once completed.
    pub winner_ids: Vec<Uuid>,
    pub artifact: Option<ArtifactEntity>,
    pub completed_at: Option<SystemTime>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Membership of a user in a battle, with running totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    pub battle_id: Uuid,
    pub user_id: Uuid,
    /// Name shown to other participants.
    pub display_name: String,
    pub joined_at: SystemTime,
    /// Credits received across all completed rounds.
    pub total_credits: u32,
    /// Number of rounds won, ties included.
    pub rounds_won: u32,
}

/// An item entered into a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionEntity {
    /// Primary key of the submission.
    pub id: Uuid,
    pub round_id: Uuid,
    pub battle_id: Uuid,
    pub submitter_id: Uuid,
    /// Reference exactly as submitted.
    pub content_ref: String,
    /// Canonical form used for duplicate detection.
    pub content_key: String,
    /// 1 or 2 within the submitter's entries for the round.
    pub order: u8,
    pub submitted_at: SystemTime,
    /// Credits received; only the vote ledger changes it.
    pub tally: u32,
}

/// A single star allocated by a voter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    /// Primary key of the vote.
    pub id: Uuid,
    pub round_id: Uuid,
    pub voter_id: Uuid,
    pub submission_id: Uuid,
    /// Credit slot (1..=3) held by this star; unique per round and voter.
    pub slot: u8,
    pub cast_at: SystemTime,
}

/// Changes applied to a round's schedule by its creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundScheduleUpdate {
    pub theme: String,
    pub description: String,
    pub submission_deadline: SystemTime,
    pub voting_deadline: SystemTime,
    pub updated_at: SystemTime,
}

/// What happens to the battle once a round completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advancement {
    /// Move the next ordinal round from pending into submission.
    Activate(TransitionPlan),
    /// No further round: close the battle.
    FinishBattle {
        /// Participants holding the highest cumulative credits.
        champion_ids: Vec<Uuid>,
    },
}

/// Everything written when a round closes, committed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundCompletion {
    /// Voting → completed plan, guarded by phase and version.
    pub plan: TransitionPlan,
    pub battle_id: Uuid,
    /// Ordinal of the round being completed.
    pub ordinal: u32,
    /// Credits received in this round, per participant.
    pub credits: Vec<(Uuid, u32)>,
    pub winner_ids: Vec<Uuid>,
    pub advancement: Advancement,
    pub completed_at: SystemTime,
}

/// Result of a membership request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new participant record was created.
    Joined,
    /// The user already participates.
    AlreadyMember,
    /// Capacity reached.
    Full,
    /// Battle no longer accepts participants.
    BattleClosed,
}

/// Result of a guarded submission write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionWrite {
    /// Write committed.
    Applied,
    /// The round left the submission phase.
    RoundClosed,
    /// Another submission in the round has the same content key.
    DuplicateContent {
        /// Owner of the existing submission.
        submitter_id: Uuid,
    },
    /// The submitter already holds this order slot.
    OrderTaken,
    /// Target submission does not exist.
    NotFound,
}

/// Result of a guarded vote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteWrite {
    /// Write committed; carries the submission's new tally.
    Applied {
        /// Tally after the adjustment.
        tally: u32,
    },
    /// The round left the voting phase.
    RoundClosed,
    /// The credit slot was taken by a concurrent vote.
    SlotTaken,
    /// No matching vote or submission.
    NotFound,
}
