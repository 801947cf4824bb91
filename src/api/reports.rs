//! Report and moderation API endpoints.
//!
//! Anyone signed in may file a report; everything else here is for administrators.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{current_revision, error, success, written, ApiResult};
use crate::auth::{require_admin, Actor};
use crate::errors::AppError;
use crate::models::{
    require_text, BanOutcome, BanUserRequest, CreateReportRequest, ListReportsQuery, Report,
    UpdateReportRequest,
};
use crate::AppState;

/// POST /api/reports - Report another user.
pub async fn create_report(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<CreateReportRequest>,
) -> ApiResult<Report> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_text(&request.reported_user_id, "reportedUserId")
        .and_then(|_| require_text(&request.reason, "Reason"))
    {
        return error(e, revision_id);
    }
    if request.reported_user_id == actor.user_id {
        return error(
            AppError::Validation("You cannot report yourself".to_string()),
            revision_id,
        );
    }

    let result = state.repo.create_report(&actor.user_id, &request).await;
    written(&state, result, revision_id).await
}

/// GET /api/reports - List reports, newest first. Admin only.
pub async fn list_reports(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListReportsQuery>,
) -> ApiResult<Vec<Report>> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_admin(&state.repo, &actor).await {
        return error(e, revision_id);
    }

    match state.repo.list_reports(query.status).await {
        Ok(reports) => success(reports, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/reports/{id} - Move a report to another status. Admin only.
pub async fn update_report(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
    Json(request): Json<UpdateReportRequest>,
) -> ApiResult<Report> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_admin(&state.repo, &actor).await {
        return error(e, revision_id);
    }

    let result = state
        .repo
        .update_report_status(&id, request.status, request.expected_version)
        .await;
    written(&state, result, revision_id).await
}

/// DELETE /api/reports/{id} - Delete a report. Admin only.
pub async fn delete_report(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = current_revision(&state).await;

    if let Err(e) = require_admin(&state.repo, &actor).await {
        return error(e, revision_id);
    }

    let result = state.repo.delete_report(&id).await;
    written(&state, result, revision_id).await
}

/// POST /api/admin/users/{id}/ban - Set a user's ban flag. Admin only.
pub async fn ban_user(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<String>,
    Json(request): Json<BanUserRequest>,
) -> ApiResult<BanOutcome> {
    let revision_id = current_revision(&state).await;

    let admin = match require_admin(&state.repo, &actor).await {
        Ok(admin) => admin,
        Err(e) => return error(e, revision_id),
    };
    if admin.id == user_id {
        return error(
            AppError::Validation("Administrators cannot ban themselves".to_string()),
            revision_id,
        );
    }

    let result = state.repo.set_ban(&user_id, request.banned).await;
    written(&state, result, revision_id).await
}
