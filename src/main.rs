//! TUTasksy Backend
//!
//! REST backend for the TUTasksy student micro-task app, with SQLite persistence, live
//! server-sent snapshots and Tantivy full-text search.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod feed;
mod lifecycle;
mod models;
mod search;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use feed::{ChangeFeed, LiveStore};
use lifecycle::InFlightGate;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub live: LiveStore,
    pub likes: InFlightGate,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, search: Arc<SearchIndex>, config: Config) -> Self {
        Self {
            live: LiveStore::new(Arc::clone(&repo)),
            repo,
            search,
            likes: InFlightGate::new(),
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TUTasksy Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (TUTASKSY_API_PSK). Authentication is disabled!");
    }
    if config.admin_ids.is_empty() {
        tracing::warn!("No admin ids configured (TUTASKSY_ADMIN_IDS). Moderation is unavailable.");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let feed = ChangeFeed::new(config.feed_capacity);
    let repo = Arc::new(
        Repository::new(pool, feed).with_max_write_retries(config.max_write_retries),
    );

    // Repair chat summaries left stale by an interrupted send
    match repo.reconcile_chat_summaries().await {
        Ok(0) => {}
        Ok(repaired) => tracing::info!("Repaired {} chat summaries", repaired),
        Err(e) => tracing::warn!("Chat summary reconciliation failed: {}", e),
    }

    // Initialize search index
    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    // Build initial search index from database
    tracing::info!("Building search index...");
    let tasks = repo.list_tasks().await?;
    search.rebuild(&tasks).await?;

    let bind_addr = config.bind_addr;
    let state = AppState::new(repo, search, config);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        .route("/revision", get(api::get_revision))
        // Profiles
        .route("/profiles", post(api::register_profile))
        .route(
            "/profiles/{id}",
            get(api::get_profile).put(api::update_profile),
        )
        // Tasks
        .route("/tasks", get(api::list_tasks).post(api::create_task))
        .route("/tasks/stream", get(api::stream_tasks))
        .route("/tasks/{id}", get(api::get_task))
        .route("/tasks/{id}/interest", post(api::mark_interest))
        .route(
            "/tasks/{id}/interest/{user_id}",
            delete(api::reject_interest),
        )
        .route("/tasks/{id}/interested", get(api::list_interested))
        .route("/tasks/{id}/accept", post(api::accept_user))
        .route("/tasks/{id}/like", post(api::toggle_like))
        // Comments
        .route(
            "/tasks/{id}/comments",
            get(api::list_comments).post(api::create_comment),
        )
        // Reports and moderation
        .route("/reports", get(api::list_reports).post(api::create_report))
        .route(
            "/reports/{id}",
            put(api::update_report).delete(api::delete_report),
        )
        .route("/admin/users/{id}/ban", post(api::ban_user))
        // Chats
        .route("/chats", get(api::list_chats).post(api::open_chat))
        .route(
            "/chats/{id}/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/chats/{id}/stream", get(api::stream_messages))
        // Search
        .route("/search", get(api::search_tasks))
        // Banned users may read but not write
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.repo),
            auth::ban_guard,
        ))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
