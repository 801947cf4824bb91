//! Request authentication and caller identity.
//!
//! The client app proves itself with a pre-shared key (compared in constant time). The signed-in
//! student is named by the `x-user-id` header, which the [`Actor`] extractor turns into a caller
//! identity. Banned callers are stopped by [`ban_guard`] before any write reaches a handler.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;

use crate::db::Repository;
use crate::errors::{codes, AppError, AppErrorWithRevision, ErrorDetails, ErrorResponse};
use crate::models::UserProfile;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header naming the signed-in user.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The signed-in caller.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
}

/// The caller, when the request names one.
#[derive(Debug, Clone)]
pub struct MaybeActor(pub Option<String>);

fn user_id_from(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppErrorWithRevision;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_id_from(parts)
            .map(|user_id| Actor { user_id })
            .ok_or_else(|| AppError::Unauthorized("Sign in required".to_string()).into())
    }
}

impl<S> FromRequestParts<S> for MaybeActor
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeActor(user_id_from(parts)))
    }
}

/// Reject writes from banned callers.
pub async fn ban_guard(
    State(repo): State<Arc<Repository>>,
    MaybeActor(user_id): MaybeActor,
    request: Request,
    next: Next,
) -> Response {
    let writes = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );

    if let (true, Some(user_id)) = (writes, user_id) {
        match repo.is_banned(&user_id).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::info!(user_id = %user_id, "rejected write from banned user");
                return AppError::Forbidden("Account suspended".to_string()).into_response();
            }
            Err(e) => {
                tracing::error!("Failed to check ban status: {}", e);
                return e.into_response();
            }
        }
    }

    next.run(request).await
}

/// Load the caller's profile and require the admin flag.
pub async fn require_admin(repo: &Repository, actor: &Actor) -> Result<UserProfile, AppError> {
    match repo.get_profile(&actor.user_id).await? {
        Some(profile) if profile.is_admin => Ok(profile),
        _ => Err(AppError::Forbidden("Administrator access required".to_string())),
    }
}

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // If no PSK is configured, allow all requests (dev mode)
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    // Get the API key from the request header
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match provided {
        Some(provided_key) => {
            // Constant-time comparison to prevent timing attacks
            if constant_time_compare(&provided_key, &expected) {
                next.run(request).await
            } else {
                unauthorized_response("Invalid API key")
            }
        }
        None => {
            // Also check Authorization header as bearer token
            let bearer = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.to_string());

            match bearer {
                Some(bearer_key) if constant_time_compare(&bearer_key, &expected) => {
                    next.run(request).await
                }
                _ => unauthorized_response("Missing or invalid API key"),
            }
        }
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    // Constant-time comparison
    a_bytes.ct_eq(b_bytes).into()
}

/// Create an unauthorized response.
fn unauthorized_response(message: &str) -> Response {
    let body = ErrorResponse {
        success: false,
        error: ErrorDetails {
            code: codes::UNAUTHORIZED.to_string(),
            message: message.to_string(),
            details: None,
        },
        revision_id: 0,
    };

    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
