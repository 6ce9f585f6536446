use axum::{
    Extension, Json,
    extract::State,
    http::Uri,
};
use tracing::{info, warn};
use uuid::Uuid;

use parley_types::api::{Claims, SessionBootstrap};

use crate::convert;
use crate::error::ApiError;
use crate::middleware::workspace_param;
use crate::state::AppState;
use crate::users::load_profile;
use crate::workspaces::join;

/// GET /platform[?workspaceId=W]: everything a client needs after sign-in.
///
/// An invite link's `workspaceId` joins the caller to that workspace and
/// makes it active; otherwise the first membership is active.
pub async fn bootstrap(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    uri: Uri,
) -> Result<Json<SessionBootstrap>, ApiError> {
    let user = load_profile(&state, &claims).await?;

    let mut invited = None;
    if let Some(raw) = workspace_param(uri.query()) {
        match raw.parse::<Uuid>() {
            Ok(workspace_id) => match join(&state, claims.sub, workspace_id).await {
                Ok(joined) => {
                    if joined {
                        info!("{} joined workspace {} via invite", claims.username, workspace_id);
                    }
                    invited = Some(workspace_id);
                }
                Err(ApiError::NotFound(_)) => {
                    warn!("Invite for unknown workspace {}", workspace_id);
                }
                Err(e) => return Err(e),
            },
            Err(_) => warn!("Ignoring malformed workspaceId '{}'", raw),
        }
    }

    let user_id = claims.sub;
    let memberships = state
        .run_db(move |db| db.list_workspaces_for_user(&user_id.to_string()))
        .await?;
    let workspaces: Vec<_> = memberships.into_iter().map(convert::membership).collect();

    let active_workspace = invited.or_else(|| workspaces.first().map(|w| w.id));
    let channels = match active_workspace {
        Some(workspace_id) => state
            .run_db(move |db| db.list_channels(&workspace_id.to_string()))
            .await?
            .into_iter()
            .map(convert::channel)
            .collect(),
        None => vec![],
    };

    Ok(Json(SessionBootstrap {
        user,
        workspaces,
        active_workspace,
        channels,
    }))
}
