use mongodb::bson::{self, DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{
        ArtifactEntity, BattleEntity, BattleStatus, ParticipantEntity, RoundEntity,
        SubmissionEntity, VoteEntity, Visibility,
    },
    state::round_machine::RoundPhase,
};

/// Store identifiers as BSON binary subtype 4 so filters and documents agree.
pub fn bson_uuid(id: Uuid) -> bson::Uuid {
    bson::Uuid::from_bytes(id.into_bytes())
}

fn from_bson_uuid(id: bson::Uuid) -> Uuid {
    Uuid::from_bytes(id.bytes())
}

fn bson_uuids(ids: &[Uuid]) -> Vec<bson::Uuid> {
    ids.iter().copied().map(bson_uuid).collect()
}

fn from_bson_uuids(ids: Vec<bson::Uuid>) -> Vec<Uuid> {
    ids.into_iter().map(from_bson_uuid).collect()
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

/// Filter selecting a document by primary key.
pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": bson_uuid(id)}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoBattleDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    name: String,
    creator_id: bson::Uuid,
    visibility: Visibility,
    capacity: i64,
    double_submissions: bool,
    status: BattleStatus,
    current_round_id: Option<bson::Uuid>,
    #[serde(default)]
    participant_count: i64,
    #[serde(default)]
    champion_ids: Vec<bson::Uuid>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<BattleEntity> for MongoBattleDocument {
    fn from(value: BattleEntity) -> Self {
        Self {
            id: bson_uuid(value.id),
            name: value.name,
            creator_id: bson_uuid(value.creator_id),
            visibility: value.visibility,
            capacity: i64::from(value.capacity),
            double_submissions: value.double_submissions,
            status: value.status,
            current_round_id: value.current_round_id.map(bson_uuid),
            participant_count: i64::from(value.participant_count),
            champion_ids: bson_uuids(&value.champion_ids),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoBattleDocument> for BattleEntity {
    fn from(value: MongoBattleDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            name: value.name,
            creator_id: from_bson_uuid(value.creator_id),
            visibility: value.visibility,
            capacity: to_u32(value.capacity),
            double_submissions: value.double_submissions,
            status: value.status,
            current_round_id: value.current_round_id.map(from_bson_uuid),
            participant_count: to_u32(value.participant_count),
            champion_ids: from_bson_uuids(value.champion_ids),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum MongoArtifactDocument {
    Ready { url: String, generated_at: DateTime },
    Failed { reason: String, failed_at: DateTime },
}

/// Artifact sub-document written with `$set`.
pub fn artifact_document(artifact: &ArtifactEntity) -> Document {
    match artifact {
        ArtifactEntity::Ready { url, generated_at } => doc! {
            "status": "ready",
            "url": url.as_str(),
            "generated_at": DateTime::from_system_time(*generated_at),
        },
        ArtifactEntity::Failed { reason, failed_at } => doc! {
            "status": "failed",
            "reason": reason.as_str(),
            "failed_at": DateTime::from_system_time(*failed_at),
        },
    }
}

impl From<&ArtifactEntity> for MongoArtifactDocument {
    fn from(value: &ArtifactEntity) -> Self {
        match value {
            ArtifactEntity::Ready { url, generated_at } => MongoArtifactDocument::Ready {
                url: url.clone(),
                generated_at: DateTime::from_system_time(*generated_at),
            },
            ArtifactEntity::Failed { reason, failed_at } => MongoArtifactDocument::Failed {
                reason: reason.clone(),
                failed_at: DateTime::from_system_time(*failed_at),
            },
        }
    }
}

impl From<MongoArtifactDocument> for ArtifactEntity {
    fn from(value: MongoArtifactDocument) -> Self {
        match value {
            MongoArtifactDocument::Ready { url, generated_at } => ArtifactEntity::Ready {
                url,
                generated_at: generated_at.to_system_time(),
            },
            MongoArtifactDocument::Failed { reason, failed_at } => ArtifactEntity::Failed {
                reason,
                failed_at: failed_at.to_system_time(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoundDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    battle_id: bson::Uuid,
    ordinal: i64,
    theme: String,
    #[serde(default)]
    description: String,
    submission_deadline: DateTime,
    voting_deadline: DateTime,
    phase: RoundPhase,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    winner_ids: Vec<bson::Uuid>,
    #[serde(default)]
    artifact: Option<MongoArtifactDocument>,
    #[serde(default)]
    completed_at: Option<DateTime>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl MongoRoundDocument {
    pub fn battle_id(&self) -> Uuid {
        from_bson_uuid(self.battle_id)
    }
}

impl From<RoundEntity> for MongoRoundDocument {
    fn from(value: RoundEntity) -> Self {
        Self {
            id: bson_uuid(value.id),
            battle_id: bson_uuid(value.battle_id),
            ordinal: i64::from(value.ordinal),
            theme: value.theme,
            description: value.description,
            submission_deadline: DateTime::from_system_time(value.submission_deadline),
            voting_deadline: DateTime::from_system_time(value.voting_deadline),
            phase: value.phase,
            version: i64::try_from(value.version).unwrap_or(i64::MAX),
            winner_ids: bson_uuids(&value.winner_ids),
            artifact: value.artifact.as_ref().map(Into::into),
            completed_at: value.completed_at.map(DateTime::from_system_time),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoRoundDocument> for RoundEntity {
    fn from(value: MongoRoundDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            battle_id: from_bson_uuid(value.battle_id),
            ordinal: to_u32(value.ordinal),
            theme: value.theme,
            description: value.description,
            submission_deadline: value.submission_deadline.to_system_time(),
            voting_deadline: value.voting_deadline.to_system_time(),
            phase: value.phase,
            version: u64::try_from(value.version).unwrap_or_default(),
            winner_ids: from_bson_uuids(value.winner_ids),
            artifact: value.artifact.map(Into::into),
            completed_at: value.completed_at.map(|at| at.to_system_time()),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

/// Participant rows rely on the driver-generated `_id`; lookups go through the
/// unique `(battle_id, user_id)` index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    battle_id: bson::Uuid,
    user_id: bson::Uuid,
    display_name: String,
    joined_at: DateTime,
    #[serde(default)]
    total_credits: i64,
    #[serde(default)]
    rounds_won: i64,
}

impl From<ParticipantEntity> for MongoParticipantDocument {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            battle_id: bson_uuid(value.battle_id),
            user_id: bson_uuid(value.user_id),
            display_name: value.display_name,
            joined_at: DateTime::from_system_time(value.joined_at),
            total_credits: i64::from(value.total_credits),
            rounds_won: i64::from(value.rounds_won),
        }
    }
}

impl From<MongoParticipantDocument> for ParticipantEntity {
    fn from(value: MongoParticipantDocument) -> Self {
        Self {
            battle_id: from_bson_uuid(value.battle_id),
            user_id: from_bson_uuid(value.user_id),
            display_name: value.display_name,
            joined_at: value.joined_at.to_system_time(),
            total_credits: to_u32(value.total_credits),
            rounds_won: to_u32(value.rounds_won),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSubmissionDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    round_id: bson::Uuid,
    battle_id: bson::Uuid,
    submitter_id: bson::Uuid,
    content_ref: String,
    content_key: String,
    order: i32,
    submitted_at: DateTime,
    #[serde(default)]
    tally: i64,
}

impl MongoSubmissionDocument {
    pub fn submitter_id(&self) -> Uuid {
        from_bson_uuid(self.submitter_id)
    }

    pub fn round_id(&self) -> Uuid {
        from_bson_uuid(self.round_id)
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn tally(&self) -> u32 {
        to_u32(self.tally)
    }
}

impl From<SubmissionEntity> for MongoSubmissionDocument {
    fn from(value: SubmissionEntity) -> Self {
        Self {
            id: bson_uuid(value.id),
            round_id: bson_uuid(value.round_id),
            battle_id: bson_uuid(value.battle_id),
            submitter_id: bson_uuid(value.submitter_id),
            content_ref: value.content_ref,
            content_key: value.content_key,
            order: i32::from(value.order),
            submitted_at: DateTime::from_system_time(value.submitted_at),
            tally: i64::from(value.tally),
        }
    }
}

impl From<MongoSubmissionDocument> for SubmissionEntity {
    fn from(value: MongoSubmissionDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            round_id: from_bson_uuid(value.round_id),
            battle_id: from_bson_uuid(value.battle_id),
            submitter_id: from_bson_uuid(value.submitter_id),
            content_ref: value.content_ref,
            content_key: value.content_key,
            order: u8::try_from(value.order).unwrap_or(1),
            submitted_at: value.submitted_at.to_system_time(),
            tally: to_u32(value.tally),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteDocument {
    #[serde(rename = "_id")]
    id: bson::Uuid,
    round_id: bson::Uuid,
    voter_id: bson::Uuid,
    submission_id: bson::Uuid,
    slot: i32,
    cast_at: DateTime,
}

impl MongoVoteDocument {
    pub fn id(&self) -> bson::Uuid {
        self.id
    }
}

impl From<VoteEntity> for MongoVoteDocument {
    fn from(value: VoteEntity) -> Self {
        Self {
            id: bson_uuid(value.id),
            round_id: bson_uuid(value.round_id),
            voter_id: bson_uuid(value.voter_id),
            submission_id: bson_uuid(value.submission_id),
            slot: i32::from(value.slot),
            cast_at: DateTime::from_system_time(value.cast_at),
        }
    }
}

impl From<MongoVoteDocument> for VoteEntity {
    fn from(value: MongoVoteDocument) -> Self {
        Self {
            id: from_bson_uuid(value.id),
            round_id: from_bson_uuid(value.round_id),
            voter_id: from_bson_uuid(value.voter_id),
            submission_id: from_bson_uuid(value.submission_id),
            slot: u8::try_from(value.slot).unwrap_or_default(),
            cast_at: value.cast_at.to_system_time(),
        }
    }
}

/// Convert a list of identifiers for `$set` updates.
pub fn uuid_list(ids: &[Uuid]) -> Vec<bson::Uuid> {
    bson_uuids(ids)
}
