use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report degraded mode and the configured backend, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_battle_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    HealthResponse::new(
        state.is_degraded().await,
        state.config().storage().label(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::battle_store::memory::MemoryBattleStore, state::AppState,
    };

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let (state, _channels) = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .set_battle_store(Arc::new(MemoryBattleStore::new()))
            .await;
        let health = health_status(&state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.storage, "memory");
    }
}
