use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::tokens::IssuedToken;

/// OAuth identity providers an account can be linked to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    GitHub,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Google => "Google",
            Provider::GitHub => "GitHub",
        }
    }
}

/// Where an account is in the signup flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    PendingVerification,
    VerifiedNoPassword,
    Active,
}

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,                  // always stored lowercase
    pub password_hash: Option<String>,  // bcrypt, never leaves the server
    pub profile_photo: String,          // relative /uploads path or external avatar URL
    pub is_email_verified: bool,
    pub provider: Option<String>,
    pub provider_id: Option<String>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<OffsetDateTime>,
    pub reset_password_token: Option<String>,
    pub reset_password_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn state(&self) -> AccountState {
        match (self.is_email_verified, self.password_hash.is_some()) {
            (false, _) => AccountState::PendingVerification,
            (true, false) => AccountState::VerifiedNoPassword,
            (true, true) => AccountState::Active,
        }
    }

    /// Local account that never finished signup. Same rule as
    /// `PgUserRepo::delete_stale`.
    pub fn is_stale(&self) -> bool {
        self.provider.is_none() && self.state() != AccountState::Active
    }
}

/// Canonical form used for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Factory for new accounts; the only way records are created.
#[derive(Debug, Clone)]
pub struct NewUser {
    name: String,
    email: String,
    is_email_verified: bool,
    provider: Option<(Provider, String)>,
    profile_photo: String,
    verification: Option<IssuedToken>,
}

impl NewUser {
    /// Email/password signup: unverified, no password, pending token.
    pub fn local(name: &str, email: &str, verification: IssuedToken) -> Self {
        Self {
            name: name.trim().to_string(),
            email: normalize_email(email),
            is_email_verified: false,
            provider: None,
            profile_photo: String::new(),
            verification: Some(verification),
        }
    }

    /// First OAuth login: the provider already vouched for the address.
    pub fn oauth(
        provider: Provider,
        provider_id: &str,
        name: &str,
        email: &str,
        avatar: Option<&str>,
    ) -> Self {
        let name = name.trim();
        Self {
            name: if name.is_empty() { "User".into() } else { name.to_string() },
            email: normalize_email(email),
            is_email_verified: true,
            provider: Some((provider, provider_id.to_string())),
            profile_photo: avatar.unwrap_or_default().to_string(),
            verification: None,
        }
    }

    pub fn into_user(self, now: OffsetDateTime) -> User {
        let (provider, provider_id) = match self.provider {
            Some((p, id)) => (Some(p.as_str().to_string()), Some(id)),
            None => (None, None),
        };
        let (token, expires) = match self.verification {
            Some(t) => (Some(t.value), Some(t.expires_at)),
            None => (None, None),
        };
        User {
            id: Uuid::new_v4(),
            name: self.name,
            email: self.email,
            password_hash: None,
            profile_photo: self.profile_photo,
            is_email_verified: self.is_email_verified,
            provider,
            provider_id,
            email_verification_token: token,
            email_verification_expires: expires,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::{issue, VERIFICATION_TTL};

    #[test]
    fn local_user_starts_pending_with_lowercase_email() {
        let now = OffsetDateTime::now_utc();
        let user = NewUser::local("  Alice ", " Alice@X.com ", issue(VERIFICATION_TTL, now)).into_user(now);
        assert_eq!(user.name, "Alice");
        assert_eq!(user.email, "alice@x.com");
        assert_eq!(user.state(), AccountState::PendingVerification);
        assert!(user.provider.is_none());
        assert_eq!(user.email_verification_expires, Some(now + VERIFICATION_TTL));
    }

    #[test]
    fn oauth_user_is_verified_without_password() {
        let now = OffsetDateTime::now_utc();
        let user = NewUser::oauth(Provider::GitHub, "42", "", "Dev@Example.com", Some("https://a/b.png"))
            .into_user(now);
        assert_eq!(user.name, "User");
        assert_eq!(user.state(), AccountState::VerifiedNoPassword);
        assert_eq!(user.provider.as_deref(), Some("github"));
        assert_eq!(user.provider_id.as_deref(), Some("42"));
        assert_eq!(user.profile_photo, "https://a/b.png");
        assert!(user.email_verification_token.is_none());
    }
}
