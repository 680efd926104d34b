//! Authenticated caller identity.
//!
//! Credentials are verified by the gateway in front of this server, which
//! forwards the user id in the `x-user-id` header. This module only parses
//! it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use bazaar_shared::constants::USER_ID_HEADER;
use bazaar_shared::UserId;

use crate::error::ServerError;

/// The user on whose behalf a request is made.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .ok_or(ServerError::Unauthenticated)?;

        UserId::parse(raw)
            .map(AuthUser)
            .map_err(|_| ServerError::Unauthenticated)
    }
}
