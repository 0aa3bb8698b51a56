use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Domain failures of the account lifecycle, mapped to HTTP at the boundary.
///
/// Messages are user-visible: login failures never reveal which field was
/// wrong, and forgot-password never reveals whether the account exists.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account is locked. Try again in {minutes} minutes")]
    AccountLocked { minutes: i64 },
    #[error("Email is not confirmed. Please check your inbox")]
    EmailNotConfirmed,
    #[error("Access denied")]
    AccessDenied,
    #[error("Email is already registered")]
    EmailTaken,
    #[error("Email is already confirmed")]
    AlreadyConfirmed,
    #[error("The {0} token has expired")]
    TokenExpired(&'static str),
    #[error("Invalid {0} token")]
    TokenInvalid(&'static str),
    #[error("No account found for that email")]
    UnknownEmail,
    #[error("{0}")]
    Validation(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::AccountLocked { .. }
            | AuthError::EmailNotConfirmed
            | AuthError::AccessDenied => StatusCode::UNAUTHORIZED,
            AuthError::EmailTaken | AuthError::AlreadyConfirmed | AuthError::TokenExpired(_) => {
                StatusCode::CONFLICT
            }
            AuthError::TokenInvalid(_) => StatusCode::NOT_FOUND,
            AuthError::UnknownEmail | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked { .. } => "account_locked",
            AuthError::EmailNotConfirmed => "email_not_confirmed",
            AuthError::AccessDenied => "access_denied",
            AuthError::EmailTaken => "email_exists",
            AuthError::AlreadyConfirmed => "already_confirmed",
            AuthError::TokenExpired(_) => "token_expired",
            AuthError::TokenInvalid(_) => "token_not_found",
            AuthError::UnknownEmail => "user_not_found",
            AuthError::Validation(_) => "validation_error",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(e) = &self {
            // details stay in the logs, the client gets a generic body
            error!(error = %e, "internal error");
        }
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(AuthError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::AccountLocked { minutes: 10 }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::EmailNotConfirmed.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::AccessDenied.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::EmailTaken.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::AlreadyConfirmed.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::TokenExpired("reset").status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::TokenInvalid("reset").status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::UnknownEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::Internal(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn credential_failures_share_one_generic_message() {
        // the message must not say which field failed
        let msg = AuthError::InvalidCredentials.to_string();
        assert_eq!(msg, "Invalid email or password");
    }

    #[test]
    fn internal_error_hides_details() {
        let err = AuthError::Internal(anyhow::anyhow!("db connection refused at 10.0.0.3"));
        assert_eq!(err.to_string(), "Internal server error");
    }

    #[test]
    fn locked_message_carries_remaining_minutes() {
        let msg = AuthError::AccountLocked { minutes: 42 }.to_string();
        assert!(msg.contains("42"));
    }
}
