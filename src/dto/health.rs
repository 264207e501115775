use serde::Serialize;
use utoipa::ToSchema;

/// Payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema, PartialEq, Eq)]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: String,
    /// Configured storage backend ("memory" or "mongo").
    pub storage: String,
}

impl HealthResponse {
    pub fn new(degraded: bool, storage: &str) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            storage: storage.to_string(),
        }
    }
}
