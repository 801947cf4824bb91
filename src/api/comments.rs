//! Comment API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{current_revision, error, success, written, ApiResult};
use crate::auth::Actor;
use crate::models::{require_text, Comment, CreateCommentRequest};
use crate::AppState;

/// GET /api/tasks/{id}/comments - A task's comments, oldest first.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Vec<Comment>> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = state.repo.require_task(&task_id).await {
        return error(e, revision_id);
    }

    match state.repo.list_comments(&task_id).await {
        Ok(comments) => success(comments, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tasks/{id}/comments - Comment on a task as the caller.
pub async fn create_comment(
    State(state): State<AppState>,
    actor: Actor,
    Path(task_id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> ApiResult<Comment> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_text(&request.text, "Comment text") {
        return error(e, revision_id);
    }

    let author = match state.repo.require_profile(&actor.user_id).await {
        Ok(author) => author,
        Err(e) => return error(e, revision_id),
    };

    let result = state
        .repo
        .create_comment(&task_id, &author, &request.text)
        .await;
    written(&state, result, revision_id).await
}
