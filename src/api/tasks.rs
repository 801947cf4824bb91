//! Task API endpoints: posting, listing, the interest/acceptance workflow and likes.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;

use super::{current_revision, error, success, written, ApiResult};
use crate::auth::{Actor, MaybeActor};
use crate::errors::AppError;
use crate::lifecycle;
use crate::models::{
    require_text, validate_image_url, AcceptRequest, CreateTaskRequest, InterestedUser,
    LikeResponse, ListTasksQuery, Task,
};
use crate::AppState;

fn validate_new_task(request: &CreateTaskRequest) -> Result<(), AppError> {
    require_text(&request.title, "Title")?;
    require_text(&request.description, "Description")?;
    require_text(&request.reward, "Reward")?;
    if request.max_accepted < 1 {
        return Err(AppError::Validation(
            "maxAccepted must be at least 1".to_string(),
        ));
    }
    if let Some(url) = &request.image_url {
        validate_image_url(url)?;
    }
    Ok(())
}

/// GET /api/tasks - List tasks, newest first, optionally through a "My Tasks" filter.
pub async fn list_tasks(
    State(state): State<AppState>,
    MaybeActor(user_id): MaybeActor,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Vec<Task>> {
    let revision_id = current_revision(&state).await;

    let tasks = match state.repo.list_tasks().await {
        Ok(tasks) => tasks,
        Err(e) => return error(e, revision_id),
    };

    match (query.filter, user_id) {
        (None, _) => success(tasks, revision_id),
        (Some(filter), Some(user_id)) => success(
            tasks
                .into_iter()
                .filter(|t| filter.matches(t, &user_id))
                .collect(),
            revision_id,
        ),
        (Some(_), None) => error(
            AppError::Unauthorized("Sign in required to filter tasks".to_string()),
            revision_id,
        ),
    }
}

/// GET /api/tasks/{id} - Get a single task.
pub async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Task> {
    let revision_id = current_revision(&state).await;

    match state.repo.get_task(&id).await {
        Ok(Some(task)) => success(task, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Task {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tasks - Post a task as the caller.
pub async fn create_task(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Task> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = validate_new_task(&request) {
        return error(e, revision_id);
    }

    // The owner's nickname is copied onto the task
    let owner = match state.repo.require_profile(&actor.user_id).await {
        Ok(owner) => owner,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.create_task(&owner, &request).await {
        Ok(task) => {
            if let Err(e) = state.search.index_task(&task).await {
                tracing::warn!("Failed to index task: {}", e);
            }
            tracing::info!(task_id = %task.id, owner = %owner.id, "task posted");
            written(&state, Ok(task), revision_id).await
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tasks/{id}/interest - Mark the caller as interested.
pub async fn mark_interest(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    let revision_id = current_revision(&state).await;

    let result = state
        .repo
        .mutate_task(&id, None, |task| {
            Ok(lifecycle::mark_interest(task, &actor.user_id))
        })
        .await
        .map(|(task, _)| task);
    written(&state, result, revision_id).await
}

/// DELETE /api/tasks/{id}/interest/{user_id} - Drop a user from the interested set.
///
/// The task owner may reject anyone; other callers may only withdraw themselves.
pub async fn reject_interest(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<Task> {
    let revision_id = current_revision(&state).await;

    let task = match state.repo.require_task(&id).await {
        Ok(task) => task,
        Err(e) => return error(e, revision_id),
    };
    if actor.user_id != task.user_id && actor.user_id != user_id {
        return error(
            AppError::Forbidden("Only the task owner can reject other users".to_string()),
            revision_id,
        );
    }

    let result = state
        .repo
        .mutate_task(&id, None, |task| {
            Ok(lifecycle::reject_interest(task, &user_id))
        })
        .await
        .map(|(task, _)| task);
    written(&state, result, revision_id).await
}

/// GET /api/tasks/{id}/interested - Interested users with their profiles.
pub async fn list_interested(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<InterestedUser>> {
    let revision_id = current_revision(&state).await;

    let task = match state.repo.require_task(&id).await {
        Ok(task) => task,
        Err(e) => return error(e, revision_id),
    };

    let mut users = Vec::with_capacity(task.interested_user_ids.len());
    for user_id in &task.interested_user_ids {
        let profile = match state.repo.get_profile(user_id).await {
            Ok(profile) => profile.map(|p| p.summary()),
            Err(e) => return error(e, revision_id),
        };
        users.push(InterestedUser {
            accepted: task.accepted_user_ids.contains(user_id),
            user_id: user_id.clone(),
            profile,
        });
    }

    success(users, revision_id)
}

/// POST /api/tasks/{id}/accept - Accept a user for the task. Owner only.
pub async fn accept_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(request): Json<AcceptRequest>,
) -> ApiResult<Task> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_text(&request.user_id, "userId") {
        return error(e, revision_id);
    }

    let task = match state.repo.require_task(&id).await {
        Ok(task) => task,
        Err(e) => return error(e, revision_id),
    };
    if actor.user_id != task.user_id {
        return error(
            AppError::Forbidden("Only the task owner can accept users".to_string()),
            revision_id,
        );
    }

    let result = state
        .repo
        .mutate_task(&id, request.expected_version, |task| {
            lifecycle::assign(task, &request.user_id)
        })
        .await;

    match result {
        Ok((task, added)) => {
            if added {
                tracing::info!(
                    task_id = %task.id,
                    user_id = %request.user_id,
                    status = task.status.as_str(),
                    "user accepted"
                );
            }
            written(&state, Ok(task), revision_id).await
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tasks/{id}/like - Toggle the caller's like.
pub async fn toggle_like(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<LikeResponse> {
    let revision_id = current_revision(&state).await;

    let Some(_permit) = state.likes.try_enter(format!("{}:{}", id, actor.user_id)) else {
        return error(
            AppError::InFlight("A like toggle for this task is already in progress".to_string()),
            revision_id,
        );
    };

    let result = state
        .repo
        .mutate_task(&id, None, |task| {
            Ok(lifecycle::toggle_like(task, &actor.user_id))
        })
        .await
        .map(|(task, liked)| LikeResponse {
            liked,
            like_count: task.like_user_ids.len(),
            task,
        });
    written(&state, result, revision_id).await
}

/// GET /api/tasks/stream - Server-sent task snapshots.
pub async fn stream_tasks(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(state.live.subscribe_tasks().into_sse()).keep_alive(KeepAlive::default())
}
