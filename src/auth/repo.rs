use axum::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{Provider, User};
use crate::auth::tokens::IssuedToken;
use crate::db::StoreError;

/// Persistence port for accounts. Every method is a single-row operation.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Fails with [`StoreError::DuplicateEmail`] if the address is taken.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    // Field writes below touch only their own columns, so overlapping
    // requests cannot restore each other's stale values. `false` / `None`
    // means no row matched.

    async fn set_name(&self, id: Uuid, name: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::DuplicateEmail`] if the address is taken.
    async fn set_email(&self, id: Uuid, email: &str) -> Result<bool, StoreError>;

    /// Returns the photo that was replaced.
    async fn set_profile_photo(&self, id: Uuid, photo: &str) -> Result<Option<String>, StoreError>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError>;

    /// Only for a verified account that has no password yet.
    async fn set_first_password(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError>;

    /// Replaces the verification token of a still unverified account,
    /// refreshing the display name when one is given.
    async fn regenerate_verification(
        &self,
        id: Uuid,
        token: &IssuedToken,
        name: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Only for active accounts (verified, password set).
    async fn set_reset_token(&self, id: Uuid, token: &IssuedToken) -> Result<bool, StoreError>;

    /// Attaches an OAuth identity to an account that has none and marks
    /// the address verified.
    async fn link_provider(
        &self,
        id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Atomically marks the matching account verified and clears its token.
    /// Returns `None` for unknown or expired tokens.
    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;

    /// Atomically replaces the password hash and clears the reset token.
    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Removes local accounts that never finished signup.
    async fn delete_stale(&self) -> Result<u64, StoreError>;
}

const USER_COLUMNS: &str = "id, name, email, password_hash, profile_photo, is_email_verified, \
     provider, provider_id, email_verification_token, email_verification_expires, \
     reset_password_token, reset_password_expires, created_at";

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, profile_photo, is_email_verified,
                               provider, provider_id, email_verification_token,
                               email_verification_expires, reset_password_token,
                               reset_password_expires, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.profile_photo)
        .bind(user.is_email_verified)
        .bind(&user.provider)
        .bind(&user.provider_id)
        .bind(&user.email_verification_token)
        .bind(user.email_verification_expires)
        .bind(&user.reset_password_token)
        .bind(user.reset_password_expires)
        .bind(user.created_at)
        .execute(&self.db)
        .await
        .map_err(StoreError::from_write)?;
        Ok(())
    }

    async fn set_name(&self, id: Uuid, name: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("UPDATE users SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_email(&self, id: Uuid, email: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("UPDATE users SET email = $2 WHERE id = $1")
            .bind(id)
            .bind(email)
            .execute(&self.db)
            .await
            .map_err(StoreError::from_write)?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_profile_photo(&self, id: Uuid, photo: &str) -> Result<Option<String>, StoreError> {
        let previous = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE users u
               SET profile_photo = $2
              FROM (SELECT id, profile_photo FROM users WHERE id = $1 FOR UPDATE) old
             WHERE u.id = old.id
            RETURNING old.profile_photo
            "#,
        )
        .bind(id)
        .bind(photo)
        .fetch_optional(&self.db)
        .await?;
        Ok(previous)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_first_password(&self, id: Uuid, password_hash: &str) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2
             WHERE id = $1
               AND is_email_verified
               AND password_hash IS NULL
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn regenerate_verification(
        &self,
        id: Uuid,
        token: &IssuedToken,
        name: Option<&str>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET email_verification_token = $2,
                   email_verification_expires = $3,
                   name = COALESCE($4, name)
             WHERE id = $1
               AND is_email_verified = FALSE
            "#,
        )
        .bind(id)
        .bind(&token.value)
        .bind(token.expires_at)
        .bind(name)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_reset_token(&self, id: Uuid, token: &IssuedToken) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET reset_password_token = $2,
                   reset_password_expires = $3
             WHERE id = $1
               AND is_email_verified
               AND password_hash IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(&token.value)
        .bind(token.expires_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn link_provider(
        &self,
        id: Uuid,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET provider = $2,
                   provider_id = $3,
                   is_email_verified = TRUE
             WHERE id = $1
               AND provider IS NULL
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn consume_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET is_email_verified = TRUE,
                   email_verification_token = NULL,
                   email_verification_expires = NULL
             WHERE email_verification_token = $1
               AND email_verification_expires > $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn consume_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $3,
                   reset_password_token = NULL,
                   reset_password_expires = NULL
             WHERE reset_password_token = $1
               AND reset_password_expires > $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token)
        .bind(now)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn delete_stale(&self) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            DELETE FROM users
             WHERE provider IS NULL
               AND (is_email_verified = FALSE OR password_hash IS NULL)
            "#,
        )
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }
}
