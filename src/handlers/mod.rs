pub mod health;
pub mod recurrence;
pub mod requests;
pub mod sweeps;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::entities::RequestKind;
use crate::errors::ServiceError;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Header carrying the acting user's identity.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The identity on whose behalf a mutation runs, taken from [`ACTOR_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| ServiceError::BadRequest(format!("missing {} header", ACTOR_HEADER)))?;

        let actor = value
            .to_str()
            .map_err(|_| ServiceError::BadRequest(format!("{} must be valid ASCII", ACTOR_HEADER)))?
            .trim();

        if actor.is_empty() {
            return Err(ServiceError::BadRequest(format!(
                "{} must not be empty",
                ACTOR_HEADER
            )));
        }

        Ok(Actor(actor.to_string()))
    }
}

/// Parses a `:kind` path segment such as `import` or `stock-check`.
pub(crate) fn parse_kind(raw: &str) -> Result<RequestKind, ServiceError> {
    RequestKind::from_slug(raw)
        .ok_or_else(|| ServiceError::NotFound(format!("Unknown request kind '{}'", raw)))
}
