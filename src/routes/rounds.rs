use std::time::SystemTime;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        common::OperationResponse,
        round::{ArtifactRetryView, RoundEnvelope, RoundInput, RoundResultsView},
        submission::{SubmissionContentRequest, SubmissionEnvelope},
    },
    error::AppError,
    routes::actor::Actor,
    services::{artifacts, battle_service, results, submission_service},
    state::SharedState,
};

/// Round editing, entry submission, results and artifact retries.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rounds/{id}", put(update_round))
        .route("/rounds/{id}/submissions", post(submit_item))
        .route("/rounds/{id}/results", get(get_round_results))
        .route("/rounds/{id}/artifact/retry", post(retry_artifact))
}

/// Change theme and deadlines of a round that has not started voting (creator only).
#[utoipa::path(
    put,
    path = "/rounds/{id}",
    tag = "rounds",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Round identifier")
    ),
    request_body = RoundInput,
    responses(
        (status = 200, description = "Round updated", body = OperationResponse<RoundEnvelope>),
        (status = 409, description = "Round already in voting or completed")
    )
)]
pub async fn update_round(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoundInput>,
) -> Result<Json<OperationResponse<RoundEnvelope>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let round =
        battle_service::update_round(store.as_ref(), actor, id, payload, SystemTime::now()).await?;
    Ok(Json(OperationResponse::ok("round updated", round)))
}

/// Enter a track into the round.
#[utoipa::path(
    post,
    path = "/rounds/{id}/submissions",
    tag = "submissions",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Round identifier")
    ),
    request_body = SubmissionContentRequest,
    responses(
        (status = 200, description = "Submission recorded", body = OperationResponse<SubmissionEnvelope>),
        (status = 400, description = "Not a valid track reference"),
        (status = 403, description = "Caller is not a participant"),
        (status = 409, description = "Round closed, duplicate track or no entries left")
    )
)]
pub async fn submit_item(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmissionContentRequest>,
) -> Result<Json<OperationResponse<SubmissionEnvelope>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let submission =
        submission_service::submit_item(store.as_ref(), actor, id, payload, SystemTime::now())
            .await?;
    Ok(Json(OperationResponse::ok(
        "submission recorded",
        SubmissionEnvelope { submission },
    )))
}

/// Final standings of a completed round.
#[utoipa::path(
    get,
    path = "/rounds/{id}/results",
    tag = "rounds",
    params(("id" = String, Path, description = "Round identifier")),
    responses(
        (status = 200, description = "Round results", body = OperationResponse<RoundResultsView>),
        (status = 409, description = "Round not completed yet")
    )
)]
pub async fn get_round_results(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<RoundResultsView>>, AppError> {
    let store = state.require_battle_store().await?;
    let view = results::get_round_results(store.as_ref(), id).await?;
    Ok(Json(OperationResponse::ok("round results loaded", view)))
}

/// Queue the artifact generation again after a failure (creator only).
#[utoipa::path(
    post,
    path = "/rounds/{id}/artifact/retry",
    tag = "rounds",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Round identifier")
    ),
    responses(
        (status = 200, description = "Generation queued", body = OperationResponse<ArtifactRetryView>),
        (status = 409, description = "Round not in voting yet or artifact already available")
    )
)]
pub async fn retry_artifact(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<ArtifactRetryView>>, AppError> {
    let store = state.require_battle_store().await?;
    let view = artifacts::retry_artifact(store.as_ref(), state.artifact_tasks(), actor, id).await?;
    Ok(Json(OperationResponse::ok("artifact generation queued", view)))
}
