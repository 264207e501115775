use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::post,
};

use crate::{
    dto::{common::OperationResponse, scheduler::TickReport},
    error::{AppError, Rejection},
    services::scheduler,
    state::SharedState,
};

const SCHEDULER_TOKEN_HEADER: &str = "x-scheduler-token";

/// External trigger for the round scheduler, guarded by a shared token.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/scheduler/tick", post(trigger_tick))
        .route_layer(middleware::from_fn_with_state(state, require_scheduler_token))
}

/// Evaluate every in-flight round now.
#[utoipa::path(
    post,
    path = "/scheduler/tick",
    tag = "scheduler",
    params(("X-Scheduler-Token" = String, Header, description = "Configured scheduler trigger token")),
    responses(
        (status = 200, description = "Tick report", body = OperationResponse<TickReport>),
        (status = 403, description = "Missing or invalid token")
    )
)]
pub async fn trigger_tick(
    State(state): State<SharedState>,
) -> Result<Json<OperationResponse<TickReport>>, AppError> {
    let report = scheduler::trigger_tick(&state).await?;
    Ok(Json(OperationResponse::ok("scheduler tick completed", report)))
}

async fn require_scheduler_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config().scheduler().trigger_token.as_deref() else {
        return Err(Rejection::Unauthorized("scheduler trigger is disabled".into()).into());
    };

    let provided = req
        .headers()
        .get(SCHEDULER_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            Rejection::Unauthorized("missing scheduler token header `X-Scheduler-Token`".into())
        })?;

    if provided != expected {
        return Err(Rejection::Unauthorized("invalid scheduler token".into()).into());
    }
    Ok(next.run(req).await)
}
