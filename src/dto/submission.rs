use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::SubmissionEntity,
    dto::{format_system_time, validation::validate_not_blank},
};

/// Track reference submitted to a round: a Spotify track link, URI or id.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmissionContentRequest {
    #[validate(length(min = 1, max = 300), custom(function = "validate_not_blank"))]
    pub content: String,
}

/// Submission as shown to callers.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SubmissionView {
    pub id: Uuid,
    pub round_id: Uuid,
    pub submitter_id: Uuid,
    pub content_ref: String,
    pub content_key: String,
    pub order: u8,
    pub submitted_at: String,
    /// Hidden while the round is still open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tally: Option<u32>,
}

impl SubmissionView {
    /// Build a view that includes the tally.
    pub fn with_tally(submission: SubmissionEntity) -> Self {
        let tally = submission.tally;
        Self {
            tally: Some(tally),
            ..Self::from(submission)
        }
    }
}

impl From<SubmissionEntity> for SubmissionView {
    fn from(submission: SubmissionEntity) -> Self {
        Self {
            id: submission.id,
            round_id: submission.round_id,
            submitter_id: submission.submitter_id,
            content_ref: submission.content_ref,
            content_key: submission.content_key,
            order: submission.order,
            submitted_at: format_system_time(submission.submitted_at),
            tally: None,
        }
    }
}

/// Payload returned after a submission write.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionEnvelope {
    pub submission: SubmissionView,
}

/// Payload returned after a submission was removed.
#[derive(Debug, Serialize, ToSchema)]
pub struct RemovedSubmission {
    pub submission_id: Uuid,
}
