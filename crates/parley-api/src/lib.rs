pub mod auth;
pub mod cleanup;
pub mod convert;
pub mod direct_messages;
pub mod error;
pub mod files;
pub mod gateway;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod search;
pub mod session;
pub mod state;
pub mod storage;
pub mod tweets;
pub mod users;
pub mod workspaces;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::state::AppState;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Every route the server exposes. Layers that only matter in production
/// (CORS, request tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth", get(auth::landing))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/callback", get(auth::callback))
        .route("/gateway", get(gateway::ws_upgrade));

    // Upload bodies get their own ceiling instead of axum's 2 MB default.
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);

    let protected_routes = Router::new()
        .route("/auth/code", post(auth::issue_code))
        .route("/api/me", get(users::me).patch(users::update_profile))
        .route("/api/me/status", axum::routing::put(users::update_status))
        .route(
            "/api/workspaces",
            get(workspaces::list_workspaces).post(workspaces::create_workspace),
        )
        .route("/api/workspaces/{workspace_id}/name", get(workspaces::workspace_name))
        .route("/api/workspaces/{workspace_id}/join", post(workspaces::join_workspace))
        .route("/api/workspaces/{workspace_id}/members", get(workspaces::list_members))
        .route(
            "/api/workspaces/{workspace_id}/channels",
            get(workspaces::list_channels).post(workspaces::create_channel),
        )
        .route("/api/channels/{channel_id}", get(workspaces::get_channel))
        .route(
            "/api/channels/{channel_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/api/messages/{message_id}", get(messages::get_message))
        .route("/api/messages/{message_id}/reactions", post(reactions::toggle_reaction))
        .route(
            "/api/dm/{user_id}",
            get(direct_messages::get_conversation).post(direct_messages::send_direct_message),
        )
        .route("/api/dm/messages/{message_id}", get(direct_messages::get_direct_message))
        .route("/api/files", post(files::upload_file).layer(upload_limit))
        .route("/api/files/{file_id}", get(files::download_file))
        .route("/api/search", get(search::search))
        .route("/api/tweets", get(tweets::list_tweets))
        .route("/api/tweets/thread/{tweet_id}", get(tweets::tweet_thread))
        .route("/api/tweets/stream", get(tweets::tweet_stream))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    let platform_routes = Router::new()
        .route("/platform", get(session::bootstrap))
        .route_layer(from_fn_with_state(state.clone(), middleware::platform_guard));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(platform_routes)
        .with_state(state)
}
