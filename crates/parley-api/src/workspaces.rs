use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_db::models::ChannelRow;
use parley_db::{is_unique_violation, timestamp_now};
use parley_types::api::{
    Claims, CreateChannelRequest, CreateChannelResponse, CreateWorkspaceRequest,
    CreateWorkspaceResponse, JoinWorkspaceResponse, WorkspaceNameResponse,
};
use parley_types::models::{Channel, MemberRole, MemberSummary, WorkspaceMembership};

use crate::convert;
use crate::error::ApiError;
use crate::messages::load_message;
use crate::state::AppState;

const MAX_NAME_LEN: usize = 80;

/// The channel, if it exists and `user_id` belongs to its workspace.
pub async fn channel_for_member(
    state: &AppState,
    user_id: Uuid,
    channel_id: Uuid,
) -> Result<ChannelRow, ApiError> {
    let (channel, allowed) = state
        .run_db(move |db| {
            let cid = channel_id.to_string();
            let channel = db.get_channel(&cid)?;
            let allowed = db.can_access_channel(&user_id.to_string(), &cid)?;
            Ok((channel, allowed))
        })
        .await?;

    let channel = channel.ok_or_else(|| ApiError::not_found("Channel not found"))?;
    if !allowed {
        return Err(ApiError::forbidden("Not a member of this workspace"));
    }
    Ok(channel)
}

async fn ensure_member(state: &AppState, user_id: Uuid, workspace_id: Uuid) -> Result<(), ApiError> {
    let (exists, member) = state
        .run_db(move |db| {
            let wid = workspace_id.to_string();
            Ok((
                db.get_workspace(&wid)?.is_some(),
                db.is_member(&wid, &user_id.to_string())?,
            ))
        })
        .await?;

    if !exists {
        return Err(ApiError::not_found("Workspace not found"));
    }
    if !member {
        return Err(ApiError::forbidden("Not a member of this workspace"));
    }
    Ok(())
}

fn clean_name(raw: &str, what: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request(format!("{} name is required", what)));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "{} name must be at most {} characters",
            what, MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Channel names are lowercase with dashes for whitespace. A leading `#`
/// is dropped before the words are joined.
pub fn channel_slug(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<WorkspaceMembership>>, ApiError> {
    let user_id = claims.sub;
    let rows = state
        .run_db(move |db| db.list_workspaces_for_user(&user_id.to_string()))
        .await?;
    Ok(Json(rows.into_iter().map(convert::membership).collect()))
}

/// POST /api/workspaces: workspace, admin membership, `general` channel and
/// its welcome message are created in one transaction.
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = clean_name(&req.name, "Workspace")?;

    let user_id = claims.sub;
    let (workspace_id, channel_id, message_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (workspace, channel, message_row) = state
        .run_db(move |db| {
            let (wid, cid, mid) = (
                workspace_id.to_string(),
                channel_id.to_string(),
                message_id.to_string(),
            );
            db.create_workspace(&wid, &name, &user_id.to_string(), &cid, &mid, &timestamp_now())?;
            Ok((db.get_workspace(&wid)?, db.get_channel(&cid)?, db.get_message(&mid)?))
        })
        .await?;

    let (Some(workspace), Some(channel), Some(message_row)) = (workspace, channel, message_row) else {
        return Err(anyhow::anyhow!("workspace {} vanished after commit", workspace_id).into());
    };

    info!("{} created workspace {} ({})", claims.username, workspace.name, workspace_id);

    let first_message = load_message(&state, message_row).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateWorkspaceResponse {
            workspace: convert::workspace(workspace),
            channel: convert::channel(channel),
            first_message,
        }),
    ))
}

/// GET /api/workspaces/{id}/name: lets invitees see where they are joining.
pub async fn workspace_name(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<WorkspaceNameResponse>, ApiError> {
    let workspace = state
        .run_db(move |db| db.get_workspace(&workspace_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("Workspace not found"))?;
    Ok(Json(WorkspaceNameResponse {
        name: workspace.name,
    }))
}

/// Join as a plain member. Joining twice is a no-op.
pub async fn join_workspace(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<JoinWorkspaceResponse>, ApiError> {
    let joined = join(&state, claims.sub, workspace_id).await?;
    if joined {
        info!("{} joined workspace {}", claims.username, workspace_id);
    }
    Ok(Json(JoinWorkspaceResponse { joined }))
}

pub(crate) async fn join(state: &AppState, user_id: Uuid, workspace_id: Uuid) -> Result<bool, ApiError> {
    state
        .run_db(move |db| {
            let wid = workspace_id.to_string();
            if db.get_workspace(&wid)?.is_none() {
                return Ok(Err(ApiError::not_found("Workspace not found")));
            }
            let joined = db.add_member(
                &wid,
                &user_id.to_string(),
                MemberRole::Member.as_str(),
                &timestamp_now(),
            )?;
            Ok(Ok(joined))
        })
        .await?
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MemberSummary>>, ApiError> {
    ensure_member(&state, claims.sub, workspace_id).await?;
    let rows = state
        .run_db(move |db| db.list_workspace_members(&workspace_id.to_string()))
        .await?;
    Ok(Json(rows.into_iter().map(convert::member).collect()))
}

pub async fn list_channels(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    ensure_member(&state, claims.sub, workspace_id).await?;
    let rows = state
        .run_db(move |db| db.list_channels(&workspace_id.to_string()))
        .await?;
    Ok(Json(rows.into_iter().map(convert::channel).collect()))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Path(workspace_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = channel_slug(&clean_name(&req.name, "Channel")?);
    if name.is_empty() {
        return Err(ApiError::bad_request("Channel name is required"));
    }
    ensure_member(&state, claims.sub, workspace_id).await?;

    let user_id = claims.sub;
    let (channel_id, message_id) = (Uuid::new_v4(), Uuid::new_v4());
    let created = state
        .run_db(move |db| {
            let wid = workspace_id.to_string();
            if db.channel_name_taken(&wid, &name)? {
                return Ok(None);
            }
            let (cid, mid) = (channel_id.to_string(), message_id.to_string());
            match db.create_channel(&cid, &wid, &name, &user_id.to_string(), &mid, &timestamp_now()) {
                Ok(()) => {}
                Err(e) if is_unique_violation(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
            Ok(Some((db.get_channel(&cid)?, db.get_message(&mid)?)))
        })
        .await?;

    let (channel, message_row) = match created {
        None => return Err(ApiError::Conflict("Channel name already exists".into())),
        Some((Some(channel), Some(message_row))) => (channel, message_row),
        Some(_) => return Err(anyhow::anyhow!("channel {} vanished after commit", channel_id).into()),
    };

    info!("{} created channel #{} in {}", claims.username, channel.name, workspace_id);

    let first_message = load_message(&state, message_row).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateChannelResponse {
            channel: convert::channel(channel),
            first_message,
        }),
    ))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Channel>, ApiError> {
    let channel = channel_for_member(&state, claims.sub, channel_id).await?;
    Ok(Json(convert::channel(channel)))
}
