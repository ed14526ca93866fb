use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::dto::{
    EmailRequest, MessageResponse, ResetPasswordRequest, SessionResponse, SetPasswordRequest,
    SigninRequest, SignupRequest, SignupResponse, VerifyEmailRequest, VerifyEmailResponse,
};
use super::services::{self, SignupOutcome};
use crate::{error::ApiResult, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/set-password", post(set_password))
        .route("/auth/signin", post(signin))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/signout", post(signout))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SignupResponse>)> {
    let Json(body) = payload?;
    let outcome = services::signup(&state, body.name.as_deref(), body.email.as_deref()).await?;
    let echo = |token: String| state.config.expose_dev_tokens.then_some(token);

    let (status, response) = match outcome {
        SignupOutcome::Created {
            user_id,
            verification_token,
        } => (
            StatusCode::CREATED,
            SignupResponse {
                success: true,
                message: "Verification email sent",
                user_id,
                require_password_setup: None,
                verification_token: echo(verification_token),
            },
        ),
        SignupOutcome::Resent {
            user_id,
            verification_token,
        } => (
            StatusCode::OK,
            SignupResponse {
                success: true,
                message: "Verification email resent",
                user_id,
                require_password_setup: None,
                verification_token: echo(verification_token),
            },
        ),
        SignupOutcome::ContinueSetup { user_id } => (
            StatusCode::OK,
            SignupResponse {
                success: true,
                message: "Email verified. Please set your password.",
                user_id,
                require_password_setup: Some(true),
                verification_token: None,
            },
        ),
    };
    Ok((status, Json(response)))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> ApiResult<Json<VerifyEmailResponse>> {
    let Json(body) = payload?;
    let user = services::verify_email(&state, body.token.as_deref()).await?;
    Ok(Json(VerifyEmailResponse {
        success: true,
        message: "Email verified successfully",
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(body) = payload?;
    services::resend_verification(&state, body.email.as_deref()).await?;
    Ok(Json(MessageResponse::ok(
        "If the email exists and is not verified, a verification email has been resent",
    )))
}

#[instrument(skip(state, payload))]
pub async fn set_password(
    State(state): State<AppState>,
    payload: Result<Json<SetPasswordRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let Json(body) = payload?;
    let (user, token) =
        services::set_password(&state, body.user_id.as_deref(), body.password.as_deref()).await?;
    Ok(Json(SessionResponse {
        success: true,
        message: "Password set successfully",
        user: user.into(),
        token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn signin(
    State(state): State<AppState>,
    payload: Result<Json<SigninRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let Json(body) = payload?;
    let (user, token) =
        services::signin(&state, body.email.as_deref(), body.password.as_deref()).await?;
    Ok(Json(SessionResponse {
        success: true,
        message: "Signed in successfully",
        user: user.into(),
        token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(body) = payload?;
    let token = services::forgot_password(&state, body.email.as_deref()).await?;
    Ok(Json(MessageResponse {
        reset_token: state.config.expose_dev_tokens.then_some(token),
        ..MessageResponse::ok("Password reset email sent")
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let Json(body) = payload?;
    services::reset_password(&state, body.token.as_deref(), body.password.as_deref()).await?;
    Ok(Json(MessageResponse::ok("Password reset successfully")))
}

/// Sessions are stateless; the client drops its token.
pub async fn signout() -> Json<Value> {
    info!("signout");
    Json(json!({ "success": true, "message": "Signed out successfully" }))
}
