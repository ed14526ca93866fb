use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    ChangePasswordRequest, EmailResponse, NameResponse, PasswordResponse, PhotoResponse,
    ProfileResponse, UpdateEmailRequest, UpdateNameRequest,
};
use super::photo::{image_extension, is_image_content_type, object_key, MAX_PHOTO_BYTES};
use crate::{
    auth::{
        jwt::AuthUser,
        password::{hash_password, is_long_enough, verify_password},
        repo_types::{normalize_email, User},
        services::is_valid_email,
    },
    error::{ApiError, ApiResult},
    state::AppState,
    storage::{key_from_public_path, public_path},
};

const TOO_LARGE: &str = "File too large. Maximum size is 5MB";

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/profile", get(get_profile))
        .route("/auth/profile/name", put(update_name))
        .route("/auth/profile/email", put(update_email))
        .route("/auth/profile/password", put(change_password))
        .route(
            "/auth/profile/photo",
            post(upload_photo).layer(DefaultBodyLimit::max(MAX_PHOTO_BYTES + 64 * 1024)),
        )
}

async fn load_user(state: &AppState, user_id: Uuid) -> ApiResult<User> {
    state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<ProfileResponse>> {
    let user = load_user(&state, user_id).await?;
    Ok(Json(ProfileResponse {
        success: true,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn update_name(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<UpdateNameRequest>, JsonRejection>,
) -> ApiResult<Json<NameResponse>> {
    let Json(body) = payload?;
    let name = body.name.as_deref().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".into()));
    }
    if !state.users.set_name(user_id, name).await? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    info!(%user_id, "name updated");
    Ok(Json(NameResponse {
        success: true,
        message: "Name updated successfully",
        name: name.to_string(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn update_email(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<UpdateEmailRequest>, JsonRejection>,
) -> ApiResult<Json<EmailResponse>> {
    let Json(body) = payload?;
    let email = normalize_email(body.email.as_deref().unwrap_or_default());
    if email.is_empty() {
        return Err(ApiError::BadRequest("Email is required".into()));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    if let Some(other) = state.users.find_by_email(&email).await? {
        if other.id != user_id {
            return Err(ApiError::Conflict("Email already in use".into()));
        }
    }

    if !state.users.set_email(user_id, &email).await? {
        return Err(ApiError::NotFound("User not found".into()));
    }
    info!(%user_id, %email, "email updated");
    Ok(Json(EmailResponse {
        success: true,
        message: "Email updated successfully",
        email,
    }))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<Json<PasswordResponse>> {
    let Json(body) = payload?;
    let (Some(current), Some(new)) = (
        body.current_password.filter(|p| !p.is_empty()),
        body.new_password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "Current password and new password are required".into(),
        ));
    };
    if !is_long_enough(&new) {
        return Err(ApiError::BadRequest(
            "New password must be at least 8 characters".into(),
        ));
    }

    let user = load_user(&state, user_id).await?;
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(ApiError::BadRequest(
            "No password set for this account. Please reset your password.".into(),
        ));
    };
    if !verify_password(&current, hash)? {
        warn!(%user_id, "password change with wrong current password");
        return Err(ApiError::BadRequest("Current password is incorrect".into()));
    }

    state.users.set_password_hash(user_id, &hash_password(&new)?).await?;
    info!(%user_id, "password changed");
    Ok(Json(PasswordResponse {
        success: true,
        message: "Password changed successfully",
    }))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::BadRequest(TOO_LARGE.into())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

struct Upload {
    ext: String,
    content_type: String,
    data: bytes::Bytes,
}

/// Reads the `photo` field; other fields are ignored.
async fn read_photo(mut mp: Multipart) -> ApiResult<Upload> {
    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("photo") {
            continue;
        }
        let ext = field.file_name().and_then(image_extension);
        let content_type = field.content_type().unwrap_or_default().to_string();
        let (Some(ext), true) = (ext, is_image_content_type(&content_type)) else {
            return Err(ApiError::BadRequest("Only image files are allowed".into()));
        };
        let data = field.bytes().await.map_err(multipart_error)?;
        if data.len() > MAX_PHOTO_BYTES {
            return Err(ApiError::BadRequest(TOO_LARGE.into()));
        }
        return Ok(Upload {
            ext,
            content_type,
            data,
        });
    }
    Err(ApiError::BadRequest("No photo uploaded".into()))
}

#[instrument(skip(state, mp))]
pub async fn upload_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<PhotoResponse>> {
    let mp = mp.map_err(|_| ApiError::BadRequest("No photo uploaded".into()))?;
    load_user(&state, user_id).await?;
    let upload = read_photo(mp).await?;

    let key = object_key(&upload.ext, OffsetDateTime::now_utc());
    state
        .storage
        .put_object(&key, upload.data, &upload.content_type)
        .await?;

    let photo_url = public_path(&key);
    let Some(previous) = state.users.set_profile_photo(user_id, &photo_url).await? else {
        return Err(ApiError::NotFound("User not found".into()));
    };
    info!(%user_id, %key, "profile photo updated");

    if let Some(old_key) = key_from_public_path(&previous) {
        if let Err(e) = state.storage.delete_object(old_key).await {
            warn!(%user_id, key = old_key, error = %e, "old profile photo not deleted");
        }
    }

    Ok(Json(PhotoResponse {
        success: true,
        message: "Profile photo updated successfully",
        photo_url,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use time::OffsetDateTime;

    use crate::auth::password::hash_password;
    use crate::auth::services::{forgot_password, reset_password, signin, AuthError};
    use crate::storage::key_from_public_path;
    use crate::testing::{fixture, send, upload, PASSWORD};

    #[tokio::test]
    async fn profile_never_exposes_password() {
        let fx = fixture();
        let (_, token) = fx.active_user("alice@x.com").await;
        let (status, body) = send(&fx.app(), Method::GET, "/auth/profile", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "alice@x.com");
        assert_eq!(body["user"]["profilePhoto"], "");
        assert!(!body.to_string().contains("$2b$"));
    }

    #[tokio::test]
    async fn deleted_user_with_valid_token_is_404() {
        let fx = fixture();
        let (user, token) = fx.active_user("gone@x.com").await;
        fx.users.remove(user.id);
        let (status, body) = send(&fx.app(), Method::GET, "/auth/profile", Some(token.as_str()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "User not found");
    }

    #[tokio::test]
    async fn update_name_trims_and_rejects_blank() {
        let fx = fixture();
        let (user, token) = fx.active_user("alice@x.com").await;
        let (status, body) = send(&fx.app(), Method::PUT, "/auth/profile/name", Some(token.as_str()), Some(json!({"name": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Name is required");

        let (status, body) = send(&fx.app(), Method::PUT, "/auth/profile/name", Some(token.as_str()), Some(json!({"name": " Alice Smith "}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Alice Smith");
        assert_eq!(fx.users.get(user.id).unwrap().name, "Alice Smith");
    }

    #[tokio::test]
    async fn name_change_does_not_revive_a_consumed_reset_token() {
        let mut fx = fixture();
        let (user, token) = fx.active_user("alice@x.com").await;
        let reset = forgot_password(&fx.state, Some("alice@x.com")).await.unwrap();

        // the reset lands after the name change has loaded the user
        let consumed = reset.clone();
        let new_hash = hash_password("reset-pass-1").unwrap();
        fx.interleave(move |repo| {
            assert!(repo
                .take_reset_token(&consumed, OffsetDateTime::now_utc(), &new_hash)
                .is_some());
        });

        let (status, _) = send(&fx.app(), Method::PUT, "/auth/profile/name", Some(token.as_str()), Some(json!({"name": "Alice B"}))).await;
        assert_eq!(status, StatusCode::OK);

        let stored = fx.users.get(user.id).unwrap();
        assert_eq!(stored.name, "Alice B");
        assert!(stored.reset_password_token.is_none());
        assert!(matches!(
            reset_password(&fx.state, Some(reset.as_str()), Some("second-reset")).await,
            Err(AuthError::InvalidResetToken)
        ));
        assert!(signin(&fx.state, Some("alice@x.com"), Some("reset-pass-1")).await.is_ok());
    }

    #[tokio::test]
    async fn update_email_must_be_unique() {
        let fx = fixture();
        fx.active_user("bob@x.com").await;
        let (user, token) = fx.active_user("alice@x.com").await;

        let (status, body) = send(&fx.app(), Method::PUT, "/auth/profile/email", Some(token.as_str()), Some(json!({"email": "BOB@x.com"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Email already in use");

        // re-submitting your own address is fine
        let (status, _) = send(&fx.app(), Method::PUT, "/auth/profile/email", Some(token.as_str()), Some(json!({"email": "alice@x.com"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&fx.app(), Method::PUT, "/auth/profile/email", Some(token.as_str()), Some(json!({"email": "Alice@New.com"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@new.com");
        assert_eq!(fx.users.get(user.id).unwrap().email, "alice@new.com");

        let (status, _) = send(&fx.app(), Method::PUT, "/auth/profile/email", Some(token.as_str()), Some(json!({"email": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn change_password_checks_current() {
        let fx = fixture();
        let (_, token) = fx.active_user("alice@x.com").await;
        let uri = "/auth/profile/password";

        let (status, body) = send(&fx.app(), Method::PUT, uri, Some(token.as_str()), Some(json!({"currentPassword": "wrong-one", "newPassword": "another-pass"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Current password is incorrect");

        let (status, body) = send(&fx.app(), Method::PUT, uri, Some(token.as_str()), Some(json!({"currentPassword": PASSWORD, "newPassword": "short"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "New password must be at least 8 characters");

        let (status, _) = send(&fx.app(), Method::PUT, uri, Some(token.as_str()), Some(json!({"currentPassword": PASSWORD, "newPassword": "another-pass"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&fx.app(), Method::POST, "/auth/signin", None, Some(json!({"email": "alice@x.com", "password": "another-pass"}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn photo_upload_replaces_previous_file() {
        let fx = fixture();
        let (user, token) = fx.active_user("alice@x.com").await;

        let (status, body) = upload(&fx.app(), "/auth/profile/photo", &token, "photo", "me.png", "image/png", b"first").await;
        assert_eq!(status, StatusCode::OK);
        let first = body["photoUrl"].as_str().unwrap().to_string();
        assert!(first.starts_with("/uploads/profiles/profile-"));
        assert!(first.ends_with(".png"));
        let first_key = key_from_public_path(&first).unwrap().to_string();
        assert!(fx.storage.contains(&first_key));

        let (status, body) = upload(&fx.app(), "/auth/profile/photo", &token, "photo", "me.JPG", "image/jpeg", b"second").await;
        assert_eq!(status, StatusCode::OK);
        let second = body["photoUrl"].as_str().unwrap().to_string();
        assert!(!fx.storage.contains(&first_key));
        assert!(fx.storage.contains(key_from_public_path(&second).unwrap()));
        assert_eq!(fx.users.get(user.id).unwrap().profile_photo, second);
    }

    #[tokio::test]
    async fn photo_upload_rejects_non_images_and_oversize() {
        let fx = fixture();
        let (_, token) = fx.active_user("alice@x.com").await;
        let uri = "/auth/profile/photo";

        let (status, body) = upload(&fx.app(), uri, &token, "photo", "notes.txt", "text/plain", b"hi").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Only image files are allowed");

        // extension and content type must both agree
        let (status, _) = upload(&fx.app(), uri, &token, "photo", "evil.png", "text/html", b"<x>").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = upload(&fx.app(), uri, &token, "avatar", "me.png", "image/png", b"x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No photo uploaded");

        let big = vec![0u8; super::MAX_PHOTO_BYTES + 1];
        let (status, body) = upload(&fx.app(), uri, &token, "photo", "big.png", "image/png", &big).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], super::TOO_LARGE);
        assert!(fx.storage.is_empty());
    }

    #[tokio::test]
    async fn oauth_avatar_is_not_deleted() {
        let fx = fixture();
        let (user, token) = fx.active_user("alice@x.com").await;
        fx.users.edit(user.id, |u| u.profile_photo = "https://avatars.example/1.png".into());

        let (status, _) = upload(&fx.app(), "/auth/profile/photo", &token, "photo", "me.gif", "image/gif", b"gif").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fx.storage.len(), 1);
    }
}
