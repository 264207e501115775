use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::{AppError, Rejection};

/// Header carrying the id of the acting user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Acting user resolved from the `X-User-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| Rejection::Unauthorized("missing `X-User-Id` header".into()))?
            .to_str()
            .map_err(|_| Rejection::InvalidInput("`X-User-Id` is not valid text".into()))?;

        Uuid::parse_str(value.trim())
            .map(Actor)
            .map_err(|_| Rejection::InvalidInput("`X-User-Id` must be a UUID".into()).into())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(header: Option<&str>) -> Result<Actor, AppError> {
        let mut builder = Request::builder().uri("/battles");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_the_user_header() {
        let id = Uuid::new_v4();
        let actor = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(actor, Actor(id));
    }

    #[tokio::test]
    async fn rejects_missing_or_malformed_ids() {
        assert!(matches!(
            extract(None).await,
            Err(AppError::Rejected(Rejection::Unauthorized(_)))
        ));
        assert!(matches!(
            extract(Some("player-one")).await,
            Err(AppError::Rejected(Rejection::InvalidInput(_)))
        ));
    }
}
