use axum::{
    Extension, Json,
    extract::State,
};
use tracing::info;

use parley_db::is_unique_violation;
use parley_db::models::ProfileUpdate;
use parley_types::api::{Claims, UpdateProfileRequest, UpdateStatusRequest};
use parley_types::models::UserProfile;

use crate::auth::validate_username;
use crate::convert;
use crate::error::ApiError;
use crate::state::AppState;

pub(crate) async fn load_profile(state: &AppState, claims: &Claims) -> Result<UserProfile, ApiError> {
    let user_id = claims.sub;
    let row = state
        .run_db(move |db| db.get_user_by_id(&user_id.to_string()))
        .await?
        // A valid token for a deleted user.
        .ok_or(ApiError::Unauthorized)?;
    Ok(convert::user_profile(row))
}

/// GET /api/me
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(load_profile(&state, &claims).await?))
}

/// PATCH /api/me: only the fields present in the body change.
pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let username = req.username.as_deref().map(str::trim).map(str::to_string);
    if let Some(name) = &username {
        validate_username(name)?;
    }

    let user_id = claims.sub;
    state
        .run_db(move |db| {
            let uid = user_id.to_string();
            if let Some(name) = &username {
                if db.get_user_by_username(name)?.is_some_and(|u| u.id != uid) {
                    return Ok(Err(ApiError::Conflict("Username is already taken".into())));
                }
            }
            let update = ProfileUpdate {
                username: username.as_deref(),
                avatar_url: req.avatar_url.as_deref(),
                phone: req.phone.as_deref(),
                bio: req.bio.as_deref(),
                employer: req.employer.as_deref(),
            };
            match db.update_profile(&uid, &update) {
                Ok(true) => Ok(Ok(())),
                Ok(false) => Ok(Err(ApiError::Unauthorized)),
                Err(e) if is_unique_violation(&e) => {
                    Ok(Err(ApiError::Conflict("Username is already taken".into())))
                }
                Err(e) => Err(e),
            }
        })
        .await??;

    info!("{} updated their profile", claims.username);
    Ok(Json(load_profile(&state, &claims).await?))
}

/// PUT /api/me/status: persist a status. Live presence follows the gateway's
/// `Track` command, not this endpoint.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    let user_id = claims.sub;
    state
        .run_db(move |db| db.set_user_status(&user_id.to_string(), req.status.as_str()))
        .await?;
    Ok(Json(load_profile(&state, &claims).await?))
}
