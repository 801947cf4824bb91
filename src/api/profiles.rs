//! Profile API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{current_revision, error, success, written, ApiResult};
use crate::auth::Actor;
use crate::errors::AppError;
use crate::models::{
    require_text, validate_image_url, RegisterProfileRequest, UpdateProfileRequest, UserProfile,
};
use crate::AppState;

/// POST /api/profiles - Register the caller's profile.
pub async fn register_profile(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<RegisterProfileRequest>,
) -> ApiResult<UserProfile> {
    let revision_id = current_revision(&state).await;

    let checks = require_text(&request.display_name, "Display name")
        .and_then(|_| require_text(&request.student_id, "Student ID"))
        .and_then(|_| require_text(&request.faculty, "Faculty"));
    if let Err(e) = checks {
        return error(e, revision_id);
    }

    let is_admin = state.config.is_admin_id(&actor.user_id);
    let result = state
        .repo
        .create_profile(&actor.user_id, &request, is_admin)
        .await;
    if result.is_ok() {
        tracing::info!(user_id = %actor.user_id, is_admin, "profile registered");
    }
    written(&state, result, revision_id).await
}

/// GET /api/profiles/{id} - Get a profile.
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<UserProfile> {
    let revision_id = current_revision(&state).await;

    match state.repo.get_profile(&id).await {
        Ok(Some(profile)) => success(profile, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Profile {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/profiles/{id} - Update the caller's own profile.
pub async fn update_profile(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(request): Json<UpdateProfileRequest>,
) -> ApiResult<UserProfile> {
    let revision_id = current_revision(&state).await;

    if actor.user_id != id {
        return error(
            AppError::Forbidden("Profiles can only be edited by their owner".to_string()),
            revision_id,
        );
    }
    if let Some(nickname) = &request.nickname {
        if let Err(e) = require_text(nickname, "Nickname") {
            return error(e, revision_id);
        }
    }
    if let Some(url) = &request.profile_image_url {
        if let Err(e) = validate_image_url(url) {
            return error(e, revision_id);
        }
    }

    let result = state.repo.update_profile(&id, &request).await;
    written(&state, result, revision_id).await
}
