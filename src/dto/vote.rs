use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Outcome of awarding or removing a star.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub round_id: Uuid,
    pub submission_id: Uuid,
    /// Stars the voter may still cast in this round.
    pub votes_remaining: u8,
}
