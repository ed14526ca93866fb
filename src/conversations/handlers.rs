use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::{
    AppendMessageRequest, ConversationListResponse, ConversationResponse, ConversationView,
    CreateConversationRequest, RenameRequest, SuccessResponse,
};
use super::repo_types::{Conversation, Message, Sender};
use crate::{
    auth::jwt::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn conversation_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/conversations", get(list_conversations).post(create_conversation))
        .route("/auth/conversations/:id/title", put(rename_conversation))
        .route(
            "/auth/conversations/:id/messages",
            axum::routing::post(append_message),
        )
        .route(
            "/auth/conversations/:id",
            axum::routing::delete(delete_conversation),
        )
}

fn not_found() -> ApiError {
    ApiError::NotFound("Conversation not found".into())
}

/// Ids that do not parse cannot belong to the caller either.
fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| not_found())
}

#[instrument(skip(state))]
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<ConversationListResponse>> {
    let items = state.conversations.list_by_user(user_id).await?;
    Ok(Json(ConversationListResponse {
        success: true,
        conversations: items.into_iter().map(ConversationView::from).collect(),
    }))
}

/// The body is optional; one that is sent must be valid.
#[instrument(skip(state, payload))]
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ConversationResponse>)> {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateConversationRequest::default(),
        Err(e) => return Err(e.into()),
    };
    let conversation = Conversation::new(user_id, body.title.as_deref(), OffsetDateTime::now_utc());
    state.conversations.insert(&conversation).await?;
    info!(%user_id, conversation_id = %conversation.id, "conversation created");
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            success: true,
            conversation: conversation.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn rename_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(body) = payload?;
    let title = body.title.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title is required".into()));
    }
    let id = parse_id(&id)?;
    if !state
        .conversations
        .rename(user_id, id, title, OffsetDateTime::now_utc())
        .await?
    {
        return Err(not_found());
    }
    Ok(Json(SuccessResponse { success: true }))
}

#[instrument(skip(state, payload))]
pub async fn append_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<AppendMessageRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(body) = payload?;
    let (Some(sender), Some(text)) = (
        body.sender.filter(|s| !s.is_empty()),
        body.text.filter(|t| !t.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("sender and text are required".into()));
    };
    let sender: Sender = sender
        .parse()
        .map_err(|_| ApiError::BadRequest("sender must be 'user' or 'ai'".into()))?;
    let id = parse_id(&id)?;

    let message = Message {
        sender,
        text,
        ts: OffsetDateTime::now_utc(),
    };
    if !state.conversations.append_message(user_id, id, &message).await? {
        return Err(not_found());
    }
    Ok(Json(SuccessResponse { success: true }))
}

#[instrument(skip(state))]
pub async fn delete_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    let id = parse_id(&id)?;
    if !state.conversations.delete(user_id, id).await? {
        return Err(not_found());
    }
    info!(%user_id, conversation_id = %id, "conversation deleted");
    Ok(Json(SuccessResponse { success: true }))
}
