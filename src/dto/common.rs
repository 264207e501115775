use serde::Serialize;
use utoipa::ToSchema;

/// Envelope returned by every successful operation: `{ success, message, ...data }`.
#[derive(Debug, Serialize, ToSchema)]
pub struct OperationResponse<T> {
    pub success: bool,
    /// Human readable summary of what happened.
    pub message: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T> OperationResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}
