use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::AuthError;
use super::jwt::{JwtKeys, TokenPair};
use super::password::{hash_password, verify_password};
use super::store::{NewUser, User, UserStore};
use super::tokens::{generate_one_time_token, token_digest};
use crate::config::SecurityConfig;
use crate::mail::Mailer;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// The account & credential lifecycle manager: registration, login with
/// lockout, email confirmation, password reset and refresh rotation.
///
/// Stateless between calls; all durable state lives behind the store, so
/// correctness under concurrency rests on the store's per-row atomicity.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    policy: SecurityConfig,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        keys: JwtKeys,
        policy: SecurityConfig,
    ) -> Self {
        Self {
            store,
            mailer,
            keys,
            policy,
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    fn token_expiry(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc() + Duration::hours(self.policy.token_ttl_hours)
    }

    /// Creates an unconfirmed account. The plaintext confirmation token is
    /// handed to the mailer and never persisted; delivery failure is logged,
    /// not fatal, since resend-confirmation can recover.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User, AuthError> {
        if self.store.find_by_email(email).await?.is_some() {
            warn!(email = %email, "registration for taken email");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password(password)?;
        let confirmation = generate_one_time_token();
        let user = self
            .store
            .create(NewUser {
                email,
                password_hash: &password_hash,
                first_name,
                last_name,
                confirmation_digest: &token_digest(&confirmation),
                confirmation_expires: self.token_expiry(),
            })
            .await?;

        if let Err(e) = self
            .mailer
            .send_confirmation(&user.email, user.first_name.as_deref(), &confirmation)
            .await
        {
            warn!(error = %e, user_id = %user.id, "confirmation mail failed; user can request a resend");
        }

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Password login. Lock state is checked before the password so a locked
    /// account never leaks whether the password was right; a mismatch
    /// atomically bumps the attempt counter and arms the lock at the
    /// configured threshold.
    pub async fn login(&self, email: &str, password: &str) -> Result<(TokenPair, User), AuthError> {
        let now = OffsetDateTime::now_utc();
        let user = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if let Some(minutes) = user.lock_remaining_minutes(now) {
            warn!(user_id = %user.id, minutes, "login attempt on locked account");
            return Err(AuthError::AccountLocked { minutes });
        }

        if !verify_password(password, &user.password_hash)? {
            let lock_until = now + Duration::minutes(self.policy.lockout_minutes);
            self.store
                .record_failed_login(user.id, self.policy.max_login_attempts, lock_until)
                .await?;
            warn!(user_id = %user.id, "login password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.email_confirmed {
            return Err(AuthError::EmailNotConfirmed);
        }

        let pair = self.keys.issue_pair(user.id, &user.email)?;
        self.store
            .record_successful_login(user.id, &token_digest(&pair.refresh))
            .await?;

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok((pair, user))
    }

    /// Rotation: the presented refresh token must match the stored digest;
    /// on success a new pair is issued and its digest overwrites the old
    /// one, so the presented token can never be replayed.
    pub async fn refresh_tokens(
        &self,
        user_id: Uuid,
        presented_refresh: &str,
    ) -> Result<TokenPair, AuthError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AccessDenied)?;
        let stored = user
            .refresh_token_hash
            .as_deref()
            .ok_or(AuthError::AccessDenied)?;
        if stored != token_digest(presented_refresh) {
            warn!(user_id = %user.id, "stale or unknown refresh token presented");
            return Err(AuthError::AccessDenied);
        }

        let pair = self.keys.issue_pair(user.id, &user.email)?;
        self.store
            .set_refresh_digest(user.id, Some(&token_digest(&pair.refresh)))
            .await?;
        debug!(user_id = %user.id, "refresh token rotated");
        Ok(pair)
    }

    pub async fn logout(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.set_refresh_digest(user_id, None).await?;
        info!(user_id = %user_id, "user logged out");
        Ok(())
    }

    /// Confirms an email from the mailed token. Unknown and expired tokens
    /// mutate nothing.
    pub async fn confirm_email(&self, token: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_confirmation_digest(&token_digest(token))
            .await?
            .ok_or(AuthError::TokenInvalid("confirmation"))?;
        let expires = user
            .email_confirmation_expires
            .ok_or(AuthError::TokenInvalid("confirmation"))?;
        if expires <= OffsetDateTime::now_utc() {
            return Err(AuthError::TokenExpired("confirmation"));
        }
        self.store.mark_confirmed(user.id).await?;
        info!(user_id = %user.id, email = %user.email, "email confirmed");
        Ok(())
    }

    /// Never fails from the caller's point of view: unknown or unconfirmed
    /// addresses are a silent no-op, and internal errors are only logged.
    /// The boundary answers one generic message either way so account
    /// existence cannot be probed.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let user = match self.store.find_by_email(email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(email = %email, "password reset for unknown email");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "forgot_password lookup failed");
                return Ok(());
            }
        };
        if !user.email_confirmed {
            debug!(user_id = %user.id, "password reset for unconfirmed account");
            return Ok(());
        }

        let reset = generate_one_time_token();
        if let Err(e) = self
            .store
            .set_reset_token(user.id, &token_digest(&reset), self.token_expiry())
            .await
        {
            error!(error = %e, user_id = %user.id, "storing reset token failed");
            return Ok(());
        }
        if let Err(e) = self
            .mailer
            .send_password_reset(&user.email, user.first_name.as_deref(), &reset)
            .await
        {
            error!(error = %e, user_id = %user.id, "password reset mail failed");
        }
        info!(user_id = %user.id, "password reset issued");
        Ok(())
    }

    /// Sets a new password from the mailed token; also clears any lockout,
    /// since proving control of the mailbox supersedes the failed-attempt
    /// history. The token is single-use.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_reset_digest(&token_digest(token))
            .await?
            .ok_or(AuthError::TokenInvalid("reset"))?;
        let expires = user
            .password_reset_expires
            .ok_or(AuthError::TokenInvalid("reset"))?;
        if expires <= OffsetDateTime::now_utc() {
            return Err(AuthError::TokenExpired("reset"));
        }

        let password_hash = hash_password(new_password)?;
        self.store.update_password(user.id, &password_hash).await?;
        info!(user_id = %user.id, "password reset completed");
        Ok(())
    }

    /// Redelivers a confirmation link with a fresh token. The previously
    /// stored value is a digest, so the old plaintext cannot be resent.
    pub async fn resend_confirmation(&self, email: &str) -> Result<(), AuthError> {
        let user = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UnknownEmail)?;
        if user.email_confirmed {
            return Err(AuthError::AlreadyConfirmed);
        }

        let confirmation = generate_one_time_token();
        self.store
            .set_confirmation_token(user.id, &token_digest(&confirmation), self.token_expiry())
            .await?;
        self.mailer
            .send_confirmation(&user.email, user.first_name.as_deref(), &confirmation)
            .await
            .map_err(AuthError::Internal)?;
        info!(user_id = %user.id, "confirmation mail resent");
        Ok(())
    }

    /// Bearer-guard support: an access token is only honored while its
    /// subject still exists and stays confirmed.
    pub async fn authorize_access(&self, user_id: Uuid) -> Result<User, AuthError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AccessDenied)?;
        if !user.email_confirmed {
            return Err(AuthError::AccessDenied);
        }
        Ok(user)
    }
}
