//! Conversation CRUD routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nimbus_core::{
    validate_title, ChatMessage, Conversation, ConversationId, MessageId, DEFAULT_TITLE,
};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Schemas
// ============================================================================

/// Body of `POST /chat/conversations`.
#[derive(Debug, Deserialize)]
pub struct ConversationCreateRequest {
    /// Title; defaults to "New Conversation".
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of `PATCH /chat/conversations/:id`.
#[derive(Debug, Deserialize)]
pub struct ConversationUpdateRequest {
    /// The new title.
    pub title: String,
}

/// Pagination query for the conversation list.
#[derive(Debug, Deserialize)]
#[allow(missing_docs)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

/// A conversation as returned by the API.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct ConversationResponse {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id.to_string(),
            title: conversation.title,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

/// A message as returned by the API.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessage> for MessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            role: message.role.as_str().to_string(),
            content: message.content,
            model: message.model,
            created_at: message.created_at,
        }
    }
}

/// Paginated conversation listing.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationResponse>,
    pub total: i64,
    pub limit: u32,
    pub offset: u32,
}

/// A conversation with its messages.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct ConversationDetailResponse {
    pub conversation: ConversationResponse,
    pub messages: Vec<MessageResponse>,
}

fn parse_conversation_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("conversation not found: {raw}")))
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /chat/conversations` - list the caller's conversations.
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let limit = query.limit.clamp(1, 500);
    let (conversations, total) = state
        .store
        .list_conversations(&principal.user_id, limit, query.offset)
        .await?;
    Ok(Json(ConversationListResponse {
        conversations: conversations
            .into_iter()
            .map(ConversationResponse::from)
            .collect(),
        total,
        limit,
        offset: query.offset,
    }))
}

/// `POST /chat/conversations` - create a conversation.
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Json(body): Json<ConversationCreateRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), ApiError> {
    let title = match body.title.as_deref() {
        Some(title) if !title.trim().is_empty() => validate_title(title)?,
        _ => DEFAULT_TITLE.to_string(),
    };
    let conversation = state
        .store
        .create_conversation(&principal.user_id, &title)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse::from(conversation)),
    ))
}

/// `GET /chat/conversations/:id` - fetch a conversation with its messages.
pub async fn get(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let conversation_id = parse_conversation_id(&id)?;
    let conversation = state
        .store
        .get_conversation(conversation_id, &principal.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation not found: {id}")))?;
    let messages = state
        .store
        .list_messages(conversation_id, &principal.user_id)
        .await?;
    Ok(Json(ConversationDetailResponse {
        conversation: ConversationResponse::from(conversation),
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

/// `PATCH /chat/conversations/:id` - rename a conversation.
pub async fn update_title(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<ConversationUpdateRequest>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation_id = parse_conversation_id(&id)?;
    let title = validate_title(&body.title)?;
    let conversation = state
        .store
        .update_conversation_title(conversation_id, &principal.user_id, &title)
        .await?;
    Ok(Json(ConversationResponse::from(conversation)))
}

/// `DELETE /chat/conversations/:id` - delete a conversation and all its
/// messages.
pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = parse_conversation_id(&id)?;
    state
        .store
        .delete_conversation(conversation_id, &principal.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /chat/messages/:id` - delete a single message.
pub async fn remove_message(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let message_id: MessageId = id
        .parse()
        .map_err(|_| ApiError::NotFound(format!("message not found: {id}")))?;
    state
        .store
        .delete_message(message_id, &principal.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

