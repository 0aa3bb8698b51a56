use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database. Token columns hold SHA-256 hex digests,
/// never plaintext.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_confirmed: bool,
    pub email_confirmation_token: Option<String>,
    pub email_confirmation_expires: Option<OffsetDateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
    pub refresh_token_hash: Option<String>,
    pub login_attempts: i32,
    pub lock_until: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Locked-ness is derived from the timestamp, not stored. Returns the
    /// remaining lock in whole minutes, rounded up.
    pub fn lock_remaining_minutes(&self, now: OffsetDateTime) -> Option<i64> {
        let until = self.lock_until?;
        if until <= now {
            return None;
        }
        let secs = (until - now).whole_seconds();
        Some((secs + 59) / 60)
    }
}

/// Fields for a freshly registered (unconfirmed) account.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub confirmation_digest: &'a str,
    pub confirmation_expires: OffsetDateTime,
}

/// CRUD seam over the user record. Postgres in production, in-memory for
/// tests. Methods that touch the lockout counters must be atomic per row.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<User>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_confirmation_digest(&self, digest: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_reset_digest(&self, digest: &str) -> anyhow::Result<Option<User>>;

    /// Atomic increment; sets the lock once attempts reach `max_attempts`.
    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// Resets attempts + lock and stores the new refresh digest.
    async fn record_successful_login(&self, id: Uuid, refresh_digest: &str) -> anyhow::Result<()>;
    /// `None` clears the session (logout).
    async fn set_refresh_digest(&self, id: Uuid, digest: Option<&str>) -> anyhow::Result<()>;

    /// Sets confirmed and clears the confirmation token + expiry.
    async fn mark_confirmed(&self, id: Uuid) -> anyhow::Result<()>;
    async fn set_confirmation_token(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()>;
    async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// Replaces the password hash, clears the reset token + expiry and the
    /// lockout counters.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, \
     email_confirmed, email_confirmation_token, email_confirmation_expires, \
     password_reset_token, password_reset_expires, refresh_token_hash, \
     login_attempts, lock_until, created_at, updated_at";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> anyhow::Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<User> {
        let query = format!(
            "INSERT INTO users (email, password_hash, first_name, last_name, \
             email_confirmation_token, email_confirmation_expires) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(new.email)
            .bind(new.password_hash)
            .bind(new.first_name)
            .bind(new.last_name)
            .bind(new.confirmation_digest)
            .bind(new.confirmation_expires)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("email", email).await
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_confirmation_digest(&self, digest: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("email_confirmation_token", digest).await
    }

    async fn find_by_reset_digest(&self, digest: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("password_reset_token", digest).await
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: OffsetDateTime,
    ) -> anyhow::Result<()> {
        // single statement so concurrent failures cannot lose updates
        sqlx::query(
            "UPDATE users SET \
               login_attempts = login_attempts + 1, \
               lock_until = CASE WHEN login_attempts + 1 >= $2 THEN $3 ELSE lock_until END, \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(max_attempts)
        .bind(lock_until)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn record_successful_login(&self, id: Uuid, refresh_digest: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET \
               login_attempts = 0, lock_until = NULL, refresh_token_hash = $2, \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(refresh_digest)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_refresh_digest(&self, id: Uuid, digest: Option<&str>) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET refresh_token_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(digest)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn mark_confirmed(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET \
               email_confirmed = TRUE, email_confirmation_token = NULL, \
               email_confirmation_expires = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_confirmation_token(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET \
               email_confirmation_token = $2, email_confirmation_expires = $3, \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(digest)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET \
               password_reset_token = $2, password_reset_expires = $3, \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(digest)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET \
               password_hash = $2, password_reset_token = NULL, \
               password_reset_expires = NULL, login_attempts = 0, lock_until = NULL, \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

/// In-memory store used in unit tests and `AppState::fake()`. Every method
/// holds the map lock for its whole read-modify-write, which gives the same
/// per-row atomicity the SQL statements give.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn get_by_email(&self, email: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    /// Test hook for state manipulation (e.g. expiring a token).
    pub fn upsert(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    fn update<F>(&self, id: Uuid, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut User),
    {
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} not found"))?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser<'_>) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == new.email) {
            anyhow::bail!("duplicate email {}", new.email);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.to_string(),
            password_hash: new.password_hash.to_string(),
            first_name: new.first_name.map(str::to_string),
            last_name: new.last_name.map(str::to_string),
            email_confirmed: false,
            email_confirmation_token: Some(new.confirmation_digest.to_string()),
            email_confirmation_expires: Some(new.confirmation_expires),
            password_reset_token: None,
            password_reset_expires: None,
            refresh_token_hash: None,
            login_attempts: 0,
            lock_until: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.get_by_email(email))
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_confirmation_digest(&self, digest: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email_confirmation_token.as_deref() == Some(digest))
            .cloned())
    }

    async fn find_by_reset_digest(&self, digest: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.password_reset_token.as_deref() == Some(digest))
            .cloned())
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lock_until: OffsetDateTime,
    ) -> anyhow::Result<()> {
        self.update(id, |u| {
            u.login_attempts += 1;
            if u.login_attempts >= max_attempts {
                u.lock_until = Some(lock_until);
            }
        })
    }

    async fn record_successful_login(&self, id: Uuid, refresh_digest: &str) -> anyhow::Result<()> {
        self.update(id, |u| {
            u.login_attempts = 0;
            u.lock_until = None;
            u.refresh_token_hash = Some(refresh_digest.to_string());
        })
    }

    async fn set_refresh_digest(&self, id: Uuid, digest: Option<&str>) -> anyhow::Result<()> {
        self.update(id, |u| u.refresh_token_hash = digest.map(str::to_string))
    }

    async fn mark_confirmed(&self, id: Uuid) -> anyhow::Result<()> {
        self.update(id, |u| {
            u.email_confirmed = true;
            u.email_confirmation_token = None;
            u.email_confirmation_expires = None;
        })
    }

    async fn set_confirmation_token(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        self.update(id, |u| {
            u.email_confirmation_token = Some(digest.to_string());
            u.email_confirmation_expires = Some(expires);
        })
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires: OffsetDateTime,
    ) -> anyhow::Result<()> {
        self.update(id, |u| {
            u.password_reset_token = Some(digest.to_string());
            u.password_reset_expires = Some(expires);
        })
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        self.update(id, |u| {
            u.password_hash = password_hash.to_string();
            u.password_reset_token = None;
            u.password_reset_expires = None;
            u.login_attempts = 0;
            u.lock_until = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    async fn seed(store: &MemoryUserStore) -> User {
        let expires = OffsetDateTime::now_utc() + Duration::hours(24);
        store
            .create(NewUser {
                email: "a@b.test",
                password_hash: "$argon2$fake",
                first_name: None,
                last_name: None,
                confirmation_digest: "digest",
                confirmation_expires: expires,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = MemoryUserStore::default();
        seed(&store).await;
        let expires = OffsetDateTime::now_utc() + Duration::hours(24);
        let err = store
            .create(NewUser {
                email: "a@b.test",
                password_hash: "x",
                first_name: None,
                last_name: None,
                confirmation_digest: "other",
                confirmation_expires: expires,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate email"));
    }

    #[tokio::test]
    async fn failed_logins_lock_only_at_threshold() {
        let store = MemoryUserStore::default();
        let user = seed(&store).await;
        let lock_until = OffsetDateTime::now_utc() + Duration::minutes(120);

        for i in 1..=4 {
            store.record_failed_login(user.id, 5, lock_until).await.unwrap();
            let u = store.get(user.id).unwrap();
            assert_eq!(u.login_attempts, i);
            assert!(u.lock_until.is_none());
        }
        store.record_failed_login(user.id, 5, lock_until).await.unwrap();
        let u = store.get(user.id).unwrap();
        assert_eq!(u.login_attempts, 5);
        assert_eq!(u.lock_until, Some(lock_until));
    }

    #[tokio::test]
    async fn successful_login_clears_counters_and_stores_digest() {
        let store = MemoryUserStore::default();
        let user = seed(&store).await;
        let lock_until = OffsetDateTime::now_utc() + Duration::minutes(120);
        for _ in 0..5 {
            store.record_failed_login(user.id, 5, lock_until).await.unwrap();
        }
        store
            .record_successful_login(user.id, "refresh-digest")
            .await
            .unwrap();
        let u = store.get(user.id).unwrap();
        assert_eq!(u.login_attempts, 0);
        assert!(u.lock_until.is_none());
        assert_eq!(u.refresh_token_hash.as_deref(), Some("refresh-digest"));
    }

    #[test]
    fn lock_remaining_minutes_rounds_up() {
        let now = OffsetDateTime::now_utc();
        let mut user = User {
            id: Uuid::new_v4(),
            email: "a@b.test".into(),
            password_hash: "x".into(),
            first_name: None,
            last_name: None,
            email_confirmed: true,
            email_confirmation_token: None,
            email_confirmation_expires: None,
            password_reset_token: None,
            password_reset_expires: None,
            refresh_token_hash: None,
            login_attempts: 0,
            lock_until: Some(now + Duration::seconds(61)),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(user.lock_remaining_minutes(now), Some(2));
        user.lock_until = Some(now - Duration::seconds(1));
        assert_eq!(user.lock_remaining_minutes(now), None);
        user.lock_until = None;
        assert_eq!(user.lock_remaining_minutes(now), None);
    }
}
