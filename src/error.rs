use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, state::round_machine::InvalidTransition};

/// Business rule rejections. Returned as values and surfaced to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Referenced battle, round, submission or vote does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Actor is not allowed to perform the operation.
    #[error("{0}")]
    Unauthorized(String),
    /// Operation does not fit the round phase or its deadline.
    #[error("{0}")]
    PhaseViolation(String),
    /// Submission or vote allowance exhausted.
    #[error("{0}")]
    QuotaExceeded(String),
    /// Conflicts with existing data or a concurrent write.
    #[error("{0}")]
    Conflict(String),
    /// Request would break a structural rule of the battle.
    #[error("{0}")]
    InvariantViolation(String),
    /// Malformed input.
    #[error("{0}")]
    InvalidInput(String),
}

impl Rejection {
    /// Stable machine-readable label exposed in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::NotFound(_) => "not_found",
            Rejection::Unauthorized(_) => "unauthorized",
            Rejection::PhaseViolation(_) => "phase_violation",
            Rejection::QuotaExceeded(_) => "quota_exceeded",
            Rejection::Conflict(_) => "conflict",
            Rejection::InvariantViolation(_) => "invariant_violation",
            Rejection::InvalidInput(_) => "invalid_input",
        }
    }

    /// Human readable message carried by the rejection.
    pub fn message(&self) -> &str {
        match self {
            Rejection::NotFound(message)
            | Rejection::Unauthorized(message)
            | Rejection::PhaseViolation(message)
            | Rejection::QuotaExceeded(message)
            | Rejection::Conflict(message)
            | Rejection::InvariantViolation(message)
            | Rejection::InvalidInput(message) => message,
        }
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was refused by a business rule.
    #[error(transparent)]
    Rejected(#[from] Rejection),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Stored data breaks an invariant the service relies on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Contention { .. } => {
                ServiceError::Rejected(Rejection::Conflict(format!("{err}; retry the request")))
            }
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::Rejected(Rejection::PhaseViolation(err.to_string()))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::Rejected(Rejection::InvalidInput(format!("validation failed: {err}")))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Business rule rejection.
    #[error("{0}")]
    Rejected(Rejection),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        AppError::Rejected(rejection)
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Rejected(rejection) => AppError::Rejected(rejection),
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Internal(message) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    kind: &'a str,
    message: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Rejected(rejection) => match rejection {
                Rejection::NotFound(_) => StatusCode::NOT_FOUND,
                Rejection::Unauthorized(_) => StatusCode::FORBIDDEN,
                Rejection::PhaseViolation(_)
                | Rejection::QuotaExceeded(_)
                | Rejection::Conflict(_) => StatusCode::CONFLICT,
                Rejection::InvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                Rejection::InvalidInput(_) => StatusCode::BAD_REQUEST,
            },
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Rejected(rejection) => rejection.kind(),
            AppError::ServiceUnavailable(_) => "unavailable",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let payload = Json(ErrorBody {
            success: false,
            kind: self.kind(),
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_http_statuses() {
        let cases = [
            (Rejection::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Rejection::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (Rejection::PhaseViolation("x".into()), StatusCode::CONFLICT),
            (Rejection::QuotaExceeded("x".into()), StatusCode::CONFLICT),
            (Rejection::Conflict("x".into()), StatusCode::CONFLICT),
            (
                Rejection::InvariantViolation("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (Rejection::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
        ];

        for (rejection, status) in cases {
            assert_eq!(AppError::from(rejection).into_response().status(), status);
        }
    }

    #[test]
    fn degraded_mode_is_service_unavailable() {
        let response = AppError::from(ServiceError::Degraded).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn write_contention_is_a_conflict() {
        let err = ServiceError::from(StorageError::Contention {
            operation: "insert_vote",
        });
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn rejection_message_is_passed_through() {
        let err = AppError::from(Rejection::QuotaExceeded(
            "no votes remaining for this round".into(),
        ));
        assert_eq!(err.to_string(), "no votes remaining for this round");
    }
}
