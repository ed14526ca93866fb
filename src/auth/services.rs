//! Signup / verification / password state machine.
//!
//! Account states: `PendingVerification -> VerifiedNoPassword -> Active`.
//! Forgot/reset password is a side channel for active accounts. Each
//! transition is one durable write before the caller gets an answer.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::jwt::JwtKeys;
use super::password::{hash_password, is_long_enough, verify_password};
use super::repo::UserRepo;
use super::repo_types::{normalize_email, AccountState, NewUser, User};
use super::tokens::{issue, RESET_TTL, VERIFICATION_TTL};
use crate::db::StoreError;
use crate::mail::{password_reset_email, verification_email};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    MissingFields(&'static str),
    #[error("Invalid email")]
    InvalidEmail,
    #[error("Password must be at least 8 characters")]
    PasswordTooShort,
    #[error("Email already registered")]
    EmailAlreadyRegistered,
    #[error("Invalid or expired verification token")]
    InvalidVerificationToken,
    #[error("Invalid or expired reset token")]
    InvalidResetToken,
    #[error("User not found")]
    UserNotFound,
    #[error("User does not exist")]
    UserDoesNotExist,
    #[error("Please verify your email first")]
    EmailNotVerified,
    #[error("Password already set. Please sign in.")]
    PasswordAlreadySet,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Please complete your account setup first")]
    SetupIncomplete,
    #[error("Please verify your email before signing in")]
    SigninUnverified,
    #[error("{0}")]
    MailDelivery(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn required(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn sign_session(state: &AppState, user_id: Uuid) -> AuthResult<String> {
    Ok(JwtKeys::from_config(&state.config.jwt).sign_session(user_id)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupOutcome {
    /// New pending account, verification mail attempted.
    Created { user_id: Uuid, verification_token: String },
    /// Existing pending account, token regenerated and mail attempted.
    Resent { user_id: Uuid, verification_token: String },
    /// Already verified but no password yet.
    ContinueSetup { user_id: Uuid },
}

/// Mail failure here is logged and swallowed: the account exists and the
/// user can ask for another email.
async fn deliver_verification(state: &AppState, to: &str, token: &str) {
    let email = verification_email(to, state.config.frontend_url(), token);
    match state.mailer.send(&email).await {
        Ok(()) => info!(to, "verification email sent"),
        Err(e) => warn!(to, error = %e, "verification email failed; continuing"),
    }
}

#[instrument(skip(state))]
pub async fn signup(state: &AppState, name: Option<&str>, email: Option<&str>) -> AuthResult<SignupOutcome> {
    let (Some(name), Some(email)) = (required(name), required(email)) else {
        return Err(AuthError::MissingFields("Name and email are required"));
    };
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidEmail);
    }
    let now = OffsetDateTime::now_utc();

    if let Some(user) = state.users.find_by_email(&email).await? {
        return match user.state() {
            AccountState::Active => Err(AuthError::EmailAlreadyRegistered),
            AccountState::VerifiedNoPassword => Ok(SignupOutcome::ContinueSetup { user_id: user.id }),
            AccountState::PendingVerification => {
                let token = issue(VERIFICATION_TTL, now);
                if !state.users.regenerate_verification(user.id, &token, Some(name)).await? {
                    // Verified (or removed) since the lookup.
                    return Ok(SignupOutcome::ContinueSetup { user_id: user.id });
                }
                deliver_verification(state, &user.email, &token.value).await;
                info!(user_id = %user.id, "verification token regenerated");
                Ok(SignupOutcome::Resent {
                    user_id: user.id,
                    verification_token: token.value,
                })
            }
        };
    }

    let token = issue(VERIFICATION_TTL, now);
    let user = NewUser::local(name, &email, token.clone()).into_user(now);
    state.users.insert(&user).await?;
    info!(user_id = %user.id, email = %user.email, "user created");
    deliver_verification(state, &user.email, &token.value).await;
    Ok(SignupOutcome::Created {
        user_id: user.id,
        verification_token: token.value,
    })
}

#[instrument(skip_all)]
pub async fn verify_email(state: &AppState, token: Option<&str>) -> AuthResult<User> {
    let Some(token) = required(token) else {
        return Err(AuthError::MissingFields("Verification token is required"));
    };
    let user = state
        .users
        .consume_verification_token(token, OffsetDateTime::now_utc())
        .await?
        .ok_or(AuthError::InvalidVerificationToken)?;
    info!(user_id = %user.id, email = %user.email, "email verified");
    Ok(user)
}

/// Succeeds silently for unknown or already verified addresses.
#[instrument(skip(state))]
pub async fn resend_verification(state: &AppState, email: Option<&str>) -> AuthResult<()> {
    let Some(email) = required(email) else {
        return Err(AuthError::MissingFields("Email is required"));
    };
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidEmail);
    }
    let Some(user) = state.users.find_by_email(&email).await? else {
        return Ok(());
    };
    if user.is_email_verified {
        return Ok(());
    }

    let token = issue(VERIFICATION_TTL, OffsetDateTime::now_utc());
    if !state.users.regenerate_verification(user.id, &token, None).await? {
        return Ok(());
    }

    let message = verification_email(&user.email, state.config.frontend_url(), &token.value);
    if let Err(e) = state.mailer.send(&message).await {
        error!(user_id = %user.id, error = %e, "resend verification email failed");
        return Err(AuthError::MailDelivery(
            "Failed to resend verification email. Please try again later.",
        ));
    }
    info!(user_id = %user.id, "verification email resent");
    Ok(())
}

/// First password for a verified account; logs the user in.
#[instrument(skip(state, password))]
pub async fn set_password(
    state: &AppState,
    user_id: Option<&str>,
    password: Option<&str>,
) -> AuthResult<(User, String)> {
    let (Some(user_id), Some(password)) = (required(user_id), password.filter(|p| !p.is_empty())) else {
        return Err(AuthError::MissingFields("User ID and password are required"));
    };
    if !is_long_enough(password) {
        return Err(AuthError::PasswordTooShort);
    }
    let id = Uuid::parse_str(user_id).map_err(|_| AuthError::UserNotFound)?;
    let mut user = state.users.find_by_id(id).await?.ok_or(AuthError::UserNotFound)?;

    match user.state() {
        AccountState::PendingVerification => return Err(AuthError::EmailNotVerified),
        AccountState::Active => return Err(AuthError::PasswordAlreadySet),
        AccountState::VerifiedNoPassword => {}
    }

    let hash = hash_password(password)?;
    if !state.users.set_first_password(user.id, &hash).await? {
        // Another request set a password first.
        return Err(AuthError::PasswordAlreadySet);
    }
    user.password_hash = Some(hash);
    let token = sign_session(state, user.id)?;
    info!(user_id = %user.id, "password set");
    Ok((user, token))
}

#[instrument(skip(state, password))]
pub async fn signin(state: &AppState, email: Option<&str>, password: Option<&str>) -> AuthResult<(User, String)> {
    let (Some(email), Some(password)) = (required(email), password.filter(|p| !p.is_empty())) else {
        return Err(AuthError::MissingFields("Email and password are required"));
    };
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidEmail);
    }

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(%email, "signin unknown email");
        return Err(AuthError::InvalidCredentials);
    };
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(AuthError::SetupIncomplete);
    };
    if !verify_password(password, hash)? {
        warn!(user_id = %user.id, "signin invalid password");
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_email_verified {
        return Err(AuthError::SigninUnverified);
    }

    let token = sign_session(state, user.id)?;
    info!(user_id = %user.id, "user signed in");
    Ok((user, token))
}

/// Unknown addresses are reported as such (404); mail failure is fatal.
/// Returns the issued reset token.
#[instrument(skip(state))]
pub async fn forgot_password(state: &AppState, email: Option<&str>) -> AuthResult<String> {
    let Some(email) = required(email) else {
        return Err(AuthError::MissingFields("Email is required"));
    };
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AuthError::InvalidEmail);
    }
    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or(AuthError::UserDoesNotExist)?;
    match user.state() {
        AccountState::PendingVerification => return Err(AuthError::EmailNotVerified),
        AccountState::VerifiedNoPassword => return Err(AuthError::SetupIncomplete),
        AccountState::Active => {}
    }

    let token = issue(RESET_TTL, OffsetDateTime::now_utc());
    if !state.users.set_reset_token(user.id, &token).await? {
        return Err(AuthError::UserDoesNotExist);
    }

    let message = password_reset_email(&user.email, state.config.frontend_url(), &token.value);
    if let Err(e) = state.mailer.send(&message).await {
        error!(user_id = %user.id, error = %e, "reset email failed");
        return Err(AuthError::MailDelivery(
            "Failed to send reset email. Please try again later.",
        ));
    }
    info!(user_id = %user.id, "reset email sent");
    Ok(token.value)
}

#[instrument(skip_all)]
pub async fn reset_password(state: &AppState, token: Option<&str>, password: Option<&str>) -> AuthResult<()> {
    let (Some(token), Some(password)) = (required(token), password.filter(|p| !p.is_empty())) else {
        return Err(AuthError::MissingFields("Token and password are required"));
    };
    if !is_long_enough(password) {
        return Err(AuthError::PasswordTooShort);
    }
    let hash = hash_password(password)?;
    let user = state
        .users
        .consume_reset_token(token, OffsetDateTime::now_utc(), &hash)
        .await?
        .ok_or(AuthError::InvalidResetToken)?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}

/// Maintenance sweep behind the `cleanup_users` binary.
#[instrument(skip_all)]
pub async fn delete_stale_users(users: &dyn UserRepo) -> AuthResult<u64> {
    let deleted = users.delete_stale().await?;
    info!(deleted, "stale users removed");
    Ok(deleted)
}
