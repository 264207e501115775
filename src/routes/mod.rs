use axum::Router;

use crate::state::SharedState;

pub mod actor;
pub mod battles;
pub mod docs;
pub mod health;
pub mod rounds;
pub mod scheduler;
pub mod submissions;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(battles::router())
        .merge(rounds::router())
        .merge(submissions::router())
        .merge(scheduler::router(state.clone()));

    api_router.merge(docs::router()).with_state(state)
}
