use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_gateway::connection;

use crate::error::ApiError;
use crate::middleware::{decode_token, session_claims};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// GET /gateway?token=...: the JWT is checked before the upgrade, so an
/// unauthenticated socket is never opened. Browsers that cannot set a query
/// token fall back to the session cookie.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let secret = &state.config.jwt_secret;
    let claims = match query.token {
        Some(token) => decode_token(secret, &token),
        None => session_claims(&headers, secret),
    }
    .ok_or(ApiError::Unauthorized)?;

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, claims.sub, claims.username)
    }))
}
