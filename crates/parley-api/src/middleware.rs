use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use url::form_urlencoded;

use parley_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Name of the cookie set by `/auth/callback`.
pub const SESSION_COOKIE: &str = "parley_session";

/// Query parameter carried through every auth redirect.
pub const WORKSPACE_PARAM: &str = "workspaceId";

pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Session from a bearer token, falling back to the session cookie.
pub fn session_claims(headers: &HeaderMap, secret: &str) -> Option<Claims> {
    let token = match headers.typed_get::<Authorization<Bearer>>() {
        Some(auth) => auth.token().to_owned(),
        None => CookieJar::from_headers(headers)
            .get(SESSION_COOKIE)?
            .value()
            .to_owned(),
    };
    decode_token(secret, &token)
}

/// The `workspaceId` query value, percent-decoded. Empty counts as absent.
pub fn workspace_param(query: Option<&str>) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == WORKSPACE_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// `path`, plus `?workspaceId=...` when one is given.
pub fn with_workspace(path: &str, workspace_id: Option<&str>) -> String {
    match workspace_id {
        Some(id) => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair(WORKSPACE_PARAM, id)
                .finish();
            format!("{}?{}", path, query)
        }
        None => path.to_string(),
    }
}

/// Extract and validate the session for `/api` routes.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims =
        session_claims(req.headers(), &state.config.jwt_secret).ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Guard for `/platform`: without a session, redirect to `/auth` and keep
/// the workspace the visitor was invited to.
pub async fn platform_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match session_claims(req.headers(), &state.config.jwt_secret) {
        Some(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        None => {
            let workspace_id = workspace_param(req.uri().query());
            Redirect::to(&with_workspace("/auth", workspace_id.as_deref())).into_response()
        }
    }
}
