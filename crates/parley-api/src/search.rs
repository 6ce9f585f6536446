use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;

use parley_types::api::Claims;
use parley_types::models::SearchResult;

use crate::convert;
use crate::error::ApiError;
use crate::state::AppState;

const SEARCH_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// GET /api/search?q=...: substring match on content and sender name across
/// the caller's workspaces, newest first.
pub async fn search(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let q = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("Search query is required"))?;

    let user_id = claims.sub;
    let rows = state
        .run_db(move |db| db.search_messages(&user_id.to_string(), &q, SEARCH_LIMIT))
        .await?;
    Ok(Json(rows.into_iter().map(convert::search_result).collect()))
}
