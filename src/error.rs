//! HTTP-facing error type. Every failure leaves the API as
//! `{ "success": false, "message": ... }`.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::services::AuthError;
use crate::db::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// Duplicate resources are reported as 400, like other input errors.
    #[error("{0}")]
    Conflict(String),

    /// A dependency (mail transport) failed in a flow that must report it.
    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Conflict(_) | ApiError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Server error".to_string()
            }
            ApiError::Json(rejection) => rejection.body_text(),
            other => other.to_string(),
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                message,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => ApiError::Conflict("Email already exists".into()),
            StoreError::Database(e) => ApiError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let message = e.to_string();
        match e {
            AuthError::Store(store) => store.into(),
            AuthError::Internal(inner) => ApiError::Internal(inner),
            AuthError::MissingFields(_)
            | AuthError::InvalidEmail
            | AuthError::PasswordTooShort
            | AuthError::InvalidVerificationToken
            | AuthError::InvalidResetToken
            | AuthError::EmailNotVerified
            | AuthError::PasswordAlreadySet => ApiError::BadRequest(message),
            AuthError::EmailAlreadyRegistered => ApiError::Conflict(message),
            AuthError::InvalidCredentials
            | AuthError::SetupIncomplete
            | AuthError::SigninUnverified => ApiError::Unauthorized(message),
            AuthError::UserNotFound | AuthError::UserDoesNotExist => ApiError::NotFound(message),
            AuthError::MailDelivery(_) => ApiError::Upstream(message),
        }
    }
}
