use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use uuid::Uuid;

use super::error::AuthError;
use crate::state::AppState;

/// Bearer guard: validates the access JWT and checks the subject is still a
/// live, confirmed account.
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::AccessDenied)?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(AuthError::AccessDenied)?;

        let claims = state
            .auth
            .keys()
            .verify_access(token)
            .map_err(|_| AuthError::AccessDenied)?;
        let user = state.auth.authorize_access(claims.sub).await?;

        Ok(AuthUser {
            user_id: user.id,
            email: user.email,
        })
    }
}
