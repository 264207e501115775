use std::time::SystemTime;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{post, put},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        common::OperationResponse,
        submission::{RemovedSubmission, SubmissionContentRequest, SubmissionEnvelope},
        vote::VoteReceipt,
    },
    error::AppError,
    routes::actor::Actor,
    services::{submission_service, vote_service},
    state::SharedState,
};

/// Editing and voting on individual submissions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/submissions/{id}",
            put(update_submission).delete(remove_submission),
        )
        .route("/submissions/{id}/votes", post(award_vote).delete(remove_vote))
}

/// Replace the track of one of the caller's submissions.
#[utoipa::path(
    put,
    path = "/submissions/{id}",
    tag = "submissions",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Submission identifier")
    ),
    request_body = SubmissionContentRequest,
    responses(
        (status = 200, description = "Submission updated", body = OperationResponse<SubmissionEnvelope>),
        (status = 403, description = "Not the caller's submission"),
        (status = 409, description = "Round closed or duplicate track")
    )
)]
pub async fn update_submission(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmissionContentRequest>,
) -> Result<Json<OperationResponse<SubmissionEnvelope>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let submission =
        submission_service::update_submission(store.as_ref(), actor, id, payload, SystemTime::now())
            .await?;
    Ok(Json(OperationResponse::ok(
        "submission updated",
        SubmissionEnvelope { submission },
    )))
}

/// Withdraw one of the caller's submissions.
#[utoipa::path(
    delete,
    path = "/submissions/{id}",
    tag = "submissions",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Submission identifier")
    ),
    responses(
        (status = 200, description = "Submission removed", body = OperationResponse<RemovedSubmission>),
        (status = 403, description = "Not the caller's submission"),
        (status = 409, description = "Round closed")
    )
)]
pub async fn remove_submission(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<RemovedSubmission>>, AppError> {
    let store = state.require_battle_store().await?;
    let removed =
        submission_service::remove_submission(store.as_ref(), actor, id, SystemTime::now()).await?;
    Ok(Json(OperationResponse::ok("submission removed", removed)))
}

/// Give one star to the submission.
#[utoipa::path(
    post,
    path = "/submissions/{id}/votes",
    tag = "votes",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Submission identifier")
    ),
    responses(
        (status = 200, description = "Vote recorded", body = OperationResponse<VoteReceipt>),
        (status = 403, description = "Own submission or not a participant"),
        (status = 409, description = "Voting closed or no votes remaining")
    )
)]
pub async fn award_vote(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<VoteReceipt>>, AppError> {
    let store = state.require_battle_store().await?;
    let receipt =
        vote_service::award_vote(store.as_ref(), state.hints(), actor, id, SystemTime::now())
            .await?;
    Ok(Json(OperationResponse::ok("vote recorded", receipt)))
}

/// Take back one star from the submission.
#[utoipa::path(
    delete,
    path = "/submissions/{id}/votes",
    tag = "votes",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Submission identifier")
    ),
    responses(
        (status = 200, description = "Vote removed", body = OperationResponse<VoteReceipt>),
        (status = 409, description = "Voting closed or no vote to remove")
    )
)]
pub async fn remove_vote(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<VoteReceipt>>, AppError> {
    let store = state.require_battle_store().await?;
    let receipt =
        vote_service::remove_vote(store.as_ref(), state.hints(), actor, id, SystemTime::now())
            .await?;
    Ok(Json(OperationResponse::ok("vote removed", receipt)))
}
