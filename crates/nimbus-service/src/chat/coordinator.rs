//! The streaming chat coordinator.
//!
//! Orchestrates one `POST /chat`: persist the user message under a row lock
//! (with a short dedupe window for rapid duplicate submissions), forward LLM
//! chunks to the client as SSE, buffer the assistant output, and persist the
//! assistant message exactly once - on normal completion, upstream failure,
//! and client disconnect alike. The producer writes framed bytes into a
//! bounded channel; the HTTP body drains it, so a closed socket surfaces as
//! a failed send and never aborts the persistence step.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use chrono::{Duration, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use nimbus_core::{derive_title, ConversationId, MessageId, Role, DEFAULT_TITLE};
use nimbus_llm::{ChatChunk, ChatTurn, LlmError};
use nimbus_store::PgStore;

use super::sse::{SseFrames, DONE_FRAME};
use super::ChatRequest;
use crate::error::ApiError;
use crate::state::AppState;

/// Identical user submissions within this window collapse onto one row.
const DUPLICATE_WINDOW_SECONDS: i64 = 5;

/// Frames queued ahead of the socket before the producer backs off.
const CHANNEL_DEPTH: usize = 32;

type FrameSender = mpsc::Sender<Result<Bytes, Infallible>>;

struct FinalizeContext {
    state: AppState,
    conversation_id: Option<ConversationId>,
    user_id: String,
    model: String,
    first_user_content: Option<String>,
}

/// Handle one streaming chat request end to end.
///
/// # Errors
///
/// Pre-stream failures (validation, unknown conversation, unreachable LLM
/// backend) surface as [`ApiError`]; once headers are out, errors travel
/// in-band as SSE frames.
pub async fn stream_chat(
    state: AppState,
    user_id: String,
    request: ChatRequest,
) -> Result<Response, ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("Messages are required".into()));
    }

    let model = state.llm.resolve_model(request.model.as_deref());

    let mut turns: Vec<ChatTurn> = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system_prompt) = request.system_prompt.as_deref() {
        turns.push(ChatTurn::new("system", system_prompt));
    }
    turns.extend(
        request
            .messages
            .iter()
            .map(|m| ChatTurn::new(&m.role, &m.content)),
    );

    let last_user_content = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone());
    let first_user_content = request
        .messages
        .iter()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone());

    // Persist the user message before opening the stream, under the
    // conversation's row lock so concurrent streams serialize here.
    let user_message_id = match request.conversation_id {
        Some(conversation_id) => {
            persist_user_message(
                &state.store,
                conversation_id,
                &user_id,
                last_user_content.as_deref(),
            )
            .await?
        }
        None => None,
    };

    let upstream = state
        .llm
        .stream_chat(&model, &turns, request.temperature)
        .await?;

    tracing::info!(
        user_id = %user_id,
        model = %model,
        conversation_id = ?request.conversation_id,
        "Chat stream opened"
    );

    let frames = SseFrames::new(model.clone());
    let context = FinalizeContext {
        state: state.clone(),
        conversation_id: request.conversation_id,
        user_id,
        model,
        first_user_content,
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(CHANNEL_DEPTH);
    tokio::spawn(produce(upstream, tx, frames, context, user_message_id));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Insert the request's trailing user message, reusing the stored row when
/// an identical one landed within the dedupe window.
async fn persist_user_message(
    store: &PgStore,
    conversation_id: ConversationId,
    user_id: &str,
    content: Option<&str>,
) -> Result<Option<MessageId>, ApiError> {
    let mut tx = store.begin().await?;
    PgStore::conversation_for_update(&mut tx, conversation_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation not found: {conversation_id}")))?;

    let Some(content) = content else {
        tx.commit().await?;
        return Ok(None);
    };

    let last = PgStore::last_message_with_role_tx(&mut tx, conversation_id, Role::User).await?;
    let now = Utc::now();
    let duplicate = last.as_ref().is_some_and(|m| {
        m.content == content && now - m.created_at < Duration::seconds(DUPLICATE_WINDOW_SECONDS)
    });

    let id = if duplicate {
        let existing = last.map(|m| m.id);
        tracing::debug!(
            conversation_id = %conversation_id,
            "Duplicate user message within window; reusing stored row"
        );
        existing
    } else {
        let message =
            PgStore::add_message_tx(&mut tx, conversation_id, Role::User, content, None).await?;
        Some(message.id)
    };
    tx.commit().await?;
    Ok(id)
}

/// Drive the upstream stream, frame chunks for the client, and finalize.
async fn produce<S>(
    upstream: S,
    tx: FrameSender,
    frames: SseFrames,
    context: FinalizeContext,
    user_message_id: Option<MessageId>,
) where
    S: Stream<Item = Result<ChatChunk, LlmError>> + Send,
{
    futures::pin_mut!(upstream);

    let mut assistant_buffer = String::new();
    let mut upstream_error: Option<LlmError> = None;
    let mut client_connected = true;

    while let Some(item) = upstream.next().await {
        match item {
            Ok(chunk) => {
                if let Some(thinking) = chunk.thinking.as_deref() {
                    client_connected &= send(&tx, frames.thinking_comment(thinking)).await;
                }
                if !chunk.content.is_empty() {
                    assistant_buffer.push_str(&chunk.content);
                    client_connected &= send(&tx, frames.content_chunk(&chunk.content)).await;
                }
                if chunk.done {
                    break;
                }
                if !client_connected {
                    tracing::info!("Client disconnected mid-stream; cancelling upstream");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Chat stream failed upstream");
                upstream_error = Some(e);
                break;
            }
        }
    }

    // The assistant save runs on every exit path so partial output is never
    // lost, including after disconnects and upstream failures.
    let assistant_message_id = finalize(&context, &assistant_buffer).await;

    if let Some(error) = upstream_error {
        let _ = send(&tx, SseFrames::error_frame(&error.to_string())).await;
    } else {
        let _ = send(&tx, frames.stop_chunk()).await;
    }
    let _ = send(
        &tx,
        SseFrames::message_ids_comment(user_message_id.as_ref(), assistant_message_id.as_ref()),
    )
    .await;
    let _ = send(&tx, DONE_FRAME.to_string()).await;
}

async fn send(tx: &FrameSender, frame: String) -> bool {
    tx.send(Ok(Bytes::from(frame))).await.is_ok()
}

/// Persist the buffered assistant output (unless an identical message
/// already exists) and auto-title the conversation on its first reply.
async fn finalize(context: &FinalizeContext, assistant_buffer: &str) -> Option<MessageId> {
    let conversation_id = context.conversation_id?;
    if assistant_buffer.is_empty() {
        return None;
    }

    let result: Result<Option<MessageId>, ApiError> = async {
        let mut tx = context.state.store.begin().await?;
        let Some(conversation) =
            PgStore::conversation_for_update(&mut tx, conversation_id, &context.user_id).await?
        else {
            return Ok(None);
        };

        let exists = PgStore::assistant_message_exists_tx(
            &mut tx,
            conversation_id,
            assistant_buffer,
            Some(&context.model),
        )
        .await?;
        if exists {
            tracing::debug!(
                conversation_id = %conversation_id,
                "Identical assistant message already stored; skipping save"
            );
            tx.commit().await?;
            return Ok(None);
        }

        let message = PgStore::add_message_tx(
            &mut tx,
            conversation_id,
            Role::Assistant,
            assistant_buffer,
            Some(&context.model),
        )
        .await?;

        if conversation.title == DEFAULT_TITLE {
            if let Some(first_user) = context.first_user_content.as_deref() {
                let title = derive_title(first_user);
                PgStore::update_title_tx(&mut tx, conversation_id, &title).await?;
                tracing::info!(
                    conversation_id = %conversation_id,
                    title = %title,
                    "Conversation auto-titled"
                );
            }
        }

        tx.commit().await?;
        Ok(Some(message.id))
    }
    .await;

    match result {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "Failed to persist assistant message"
            );
            None
        }
    }
}
