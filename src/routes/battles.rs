use std::time::SystemTime;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        battle::{
            BattleDetails, BattleList, CreateBattleRequest, EnrollParticipantRequest,
            JoinBattleRequest, MembershipView,
        },
        common::OperationResponse,
        round::{CurrentRoundView, RoundEnvelope, RoundInput},
    },
    error::AppError,
    routes::actor::Actor,
    services::battle_service,
    state::SharedState,
};

/// Battle creation, membership and round planning.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/battles", get(list_battles).post(create_battle))
        .route("/battles/{id}", get(get_battle))
        .route("/battles/{id}/rounds", post(add_round))
        .route("/battles/{id}/join", post(join_battle))
        .route("/battles/{id}/participants", post(enroll_participant))
        .route("/battles/{id}/current-round", get(get_current_round))
}

/// Open a battle and its first round; the caller becomes its creator.
#[utoipa::path(
    post,
    path = "/battles",
    tag = "battles",
    params(("X-User-Id" = String, Header, description = "Acting user")),
    request_body = CreateBattleRequest,
    responses(
        (status = 200, description = "Battle created", body = OperationResponse<BattleDetails>),
        (status = 400, description = "Invalid payload"),
        (status = 422, description = "Deadlines out of order")
    )
)]
pub async fn create_battle(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Json(payload): Json<CreateBattleRequest>,
) -> Result<Json<OperationResponse<BattleDetails>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let details =
        battle_service::create_battle(store.as_ref(), actor, payload, SystemTime::now()).await?;
    Ok(Json(OperationResponse::ok("battle created", details)))
}

/// Battles visible to the caller.
#[utoipa::path(
    get,
    path = "/battles",
    tag = "battles",
    params(("X-User-Id" = String, Header, description = "Acting user")),
    responses((status = 200, description = "Visible battles", body = OperationResponse<BattleList>))
)]
pub async fn list_battles(
    State(state): State<SharedState>,
    Actor(actor): Actor,
) -> Result<Json<OperationResponse<BattleList>>, AppError> {
    let store = state.require_battle_store().await?;
    let list = battle_service::list_battles(store.as_ref(), actor).await?;
    Ok(Json(OperationResponse::ok("battles listed", list)))
}

#[utoipa::path(
    get,
    path = "/battles/{id}",
    tag = "battles",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Battle identifier")
    ),
    responses(
        (status = 200, description = "Battle with rounds and participants", body = OperationResponse<BattleDetails>),
        (status = 404, description = "Unknown or hidden battle")
    )
)]
pub async fn get_battle(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<BattleDetails>>, AppError> {
    let store = state.require_battle_store().await?;
    let details = battle_service::get_battle(store.as_ref(), actor, id).await?;
    Ok(Json(OperationResponse::ok("battle loaded", details)))
}

/// Append a pending round (creator only).
#[utoipa::path(
    post,
    path = "/battles/{id}/rounds",
    tag = "battles",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Battle identifier")
    ),
    request_body = RoundInput,
    responses(
        (status = 200, description = "Round added", body = OperationResponse<RoundEnvelope>),
        (status = 403, description = "Caller is not the creator"),
        (status = 409, description = "Battle completed or changed concurrently")
    )
)]
pub async fn add_round(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoundInput>,
) -> Result<Json<OperationResponse<RoundEnvelope>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let round =
        battle_service::add_round(store.as_ref(), actor, id, payload, SystemTime::now()).await?;
    Ok(Json(OperationResponse::ok("round added", round)))
}

/// Join a public battle.
#[utoipa::path(
    post,
    path = "/battles/{id}/join",
    tag = "battles",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Battle identifier")
    ),
    request_body = JoinBattleRequest,
    responses(
        (status = 200, description = "Joined", body = OperationResponse<MembershipView>),
        (status = 403, description = "Battle is private"),
        (status = 409, description = "Already a participant"),
        (status = 422, description = "Battle is full")
    )
)]
pub async fn join_battle(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<JoinBattleRequest>,
) -> Result<Json<OperationResponse<MembershipView>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let membership =
        battle_service::join_battle(store.as_ref(), actor, id, payload, SystemTime::now()).await?;
    Ok(Json(OperationResponse::ok("joined battle", membership)))
}

/// Enroll a user into the battle (creator only).
#[utoipa::path(
    post,
    path = "/battles/{id}/participants",
    tag = "battles",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Battle identifier")
    ),
    request_body = EnrollParticipantRequest,
    responses(
        (status = 200, description = "Participant enrolled", body = OperationResponse<MembershipView>),
        (status = 403, description = "Caller is not the creator"),
        (status = 422, description = "Battle is full")
    )
)]
pub async fn enroll_participant(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<EnrollParticipantRequest>,
) -> Result<Json<OperationResponse<MembershipView>>, AppError> {
    payload.validate()?;
    let store = state.require_battle_store().await?;
    let membership =
        battle_service::enroll_participant(store.as_ref(), actor, id, payload, SystemTime::now())
            .await?;
    Ok(Json(OperationResponse::ok("participant enrolled", membership)))
}

/// The battle's current round, filtered for the caller.
#[utoipa::path(
    get,
    path = "/battles/{id}/current-round",
    tag = "battles",
    params(
        ("X-User-Id" = String, Header, description = "Acting user"),
        ("id" = String, Path, description = "Battle identifier")
    ),
    responses((status = 200, description = "Current round", body = OperationResponse<CurrentRoundView>))
)]
pub async fn get_current_round(
    State(state): State<SharedState>,
    Actor(actor): Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<CurrentRoundView>>, AppError> {
    let store = state.require_battle_store().await?;
    let view = battle_service::get_current_round(store.as_ref(), actor, id).await?;
    Ok(Json(OperationResponse::ok("current round loaded", view)))
}
