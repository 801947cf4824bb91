//! Chat API endpoints. Only a chat's two participants can read or write it.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;

use super::{current_revision, error, success, written, ApiResult};
use crate::auth::Actor;
use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::{
    require_text, validate_image_url, Chat, ChatPreview, Message, OpenChatRequest,
    SendMessageRequest,
};
use crate::AppState;

async fn participant_chat(state: &AppState, actor: &Actor, chat_id: &str) -> Result<Chat, AppError> {
    let chat = state.repo.require_chat(chat_id).await?;
    if !chat.has_participant(&actor.user_id) {
        return Err(AppError::Forbidden(
            "Only chat participants can access this chat".to_string(),
        ));
    }
    Ok(chat)
}

/// POST /api/chats - Find or create the caller's chat with another user.
pub async fn open_chat(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<OpenChatRequest>,
) -> ApiResult<Chat> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_text(&request.other_user_id, "otherUserId") {
        return error(e, revision_id);
    }
    if request.other_user_id == actor.user_id {
        return error(
            AppError::Validation("Cannot open a chat with yourself".to_string()),
            revision_id,
        );
    }
    if let Err(e) = state.repo.require_profile(&request.other_user_id).await {
        return error(e, revision_id);
    }

    let result = state
        .repo
        .open_chat(&actor.user_id, &request.other_user_id)
        .await
        .map(|(chat, _)| chat);
    written(&state, result, revision_id).await
}

/// GET /api/chats - The caller's chats, most recent activity first.
pub async fn list_chats(State(state): State<AppState>, actor: Actor) -> ApiResult<Vec<ChatPreview>> {
    let revision_id = current_revision(&state).await;

    match state.repo.list_chat_previews(&actor.user_id).await {
        Ok(previews) => success(previews, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/chats/{id}/messages - Messages of a chat, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    actor: Actor,
    Path(chat_id): Path<String>,
) -> ApiResult<Vec<Message>> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = participant_chat(&state, &actor, &chat_id).await {
        return error(e, revision_id);
    }

    match state.repo.list_messages(&chat_id).await {
        Ok(messages) => success(messages, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/chats/{id}/messages - Send a text and/or image message.
pub async fn send_message(
    State(state): State<AppState>,
    actor: Actor,
    Path(chat_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    let revision_id = current_revision(&state).await;

    if request.text.trim().is_empty() && request.image_url.is_none() {
        return error(
            AppError::Validation("A message needs text or an image".to_string()),
            revision_id,
        );
    }
    if let Some(url) = &request.image_url {
        if let Err(e) = validate_image_url(url) {
            return error(e, revision_id);
        }
    }
    if let Err(e) = participant_chat(&state, &actor, &chat_id).await {
        return error(e, revision_id);
    }

    let result = state
        .repo
        .send_message(&chat_id, &actor.user_id, &request)
        .await;
    written(&state, result, revision_id).await
}

/// GET /api/chats/{id}/stream - Server-sent message snapshots for one chat.
pub async fn stream_messages(
    State(state): State<AppState>,
    actor: Actor,
    Path(chat_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppErrorWithRevision> {
    participant_chat(&state, &actor, &chat_id).await?;

    Ok(Sse::new(state.live.subscribe_messages(&chat_id).into_sse())
        .keep_alive(KeepAlive::default()))
}
