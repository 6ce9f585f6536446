use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use parley_db::models::{MessageRow, NewMessage};
use parley_db::timestamp_now;
use parley_types::api::{Claims, SendMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::ChannelMessage;

use crate::convert::{self, MessageParts};
use crate::error::ApiError;
use crate::state::AppState;
use crate::workspaces::channel_for_member;

/// Join attachments, reactions and (for top-level rows) replies onto a
/// single message row.
pub async fn load_message(state: &AppState, row: MessageRow) -> Result<ChannelMessage, ApiError> {
    let top_level = row.parent_id.is_none();
    let id = row.id.clone();

    let (replies, attachments, reactions) = state
        .run_db(move |db| {
            let replies = if top_level {
                db.get_replies(std::slice::from_ref(&id))?
            } else {
                vec![]
            };
            let mut ids: Vec<String> = replies.iter().map(|r| r.id.clone()).collect();
            ids.push(id);
            Ok((
                replies,
                db.get_attachments_for_messages(&ids)?,
                db.get_reactions_for_messages(&ids)?,
            ))
        })
        .await?;

    let mut parts = MessageParts {
        attachments: convert::group_attachments(attachments),
        reactions: convert::group_reactions(reactions),
    };

    if top_level {
        Ok(parts.thread(vec![row], replies).remove(0))
    } else {
        Ok(parts.message(row))
    }
}

/// GET /api/channels/{channel_id}/messages: every top-level message, oldest
/// first, each with one level of replies.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChannelMessage>>, ApiError> {
    channel_for_member(&state, claims.sub, channel_id).await?;

    let (top_level, replies, attachments, reactions) = state
        .run_db(move |db| {
            let top_level = db.get_top_level_messages(&channel_id.to_string())?;
            let parent_ids: Vec<String> = top_level.iter().map(|m| m.id.clone()).collect();
            let replies = db.get_replies(&parent_ids)?;

            let all_ids: Vec<String> = parent_ids
                .into_iter()
                .chain(replies.iter().map(|r| r.id.clone()))
                .collect();
            let attachments = db.get_attachments_for_messages(&all_ids)?;
            let reactions = db.get_reactions_for_messages(&all_ids)?;
            Ok((top_level, replies, attachments, reactions))
        })
        .await?;

    let mut parts = MessageParts {
        attachments: convert::group_attachments(attachments),
        reactions: convert::group_reactions(reactions),
    };
    Ok(Json(parts.thread(top_level, replies)))
}

/// GET /api/messages/{message_id}: one row with its author joined. This is
/// what clients fetch when the gateway reports an insert.
pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ChannelMessage>, ApiError> {
    let row = state
        .run_db(move |db| db.get_message(&message_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    let channel_id = convert::parse_uuid(&row.channel_id, "message channel_id");
    channel_for_member(&state, claims.sub, channel_id).await?;

    Ok(Json(load_message(&state, row).await?))
}

/// POST /api/channels/{channel_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();

    // Keep the first occurrence of each attachment id.
    let mut seen = HashSet::new();
    let attachments: Vec<String> = req
        .attachments
        .iter()
        .filter(|id| seen.insert(**id))
        .map(Uuid::to_string)
        .collect();

    if content.is_empty() && attachments.is_empty() {
        return Err(ApiError::bad_request("Message content is required"));
    }

    channel_for_member(&state, claims.sub, channel_id).await?;

    let message_id = Uuid::new_v4();
    let user_id = claims.sub;
    let parent_id = req.parent_id;

    let row = state
        .run_db(move |db| {
            let cid = channel_id.to_string();
            let uid = user_id.to_string();

            if let Some(parent_id) = parent_id {
                let parent = db.get_message(&parent_id.to_string())?;
                let valid = parent.is_some_and(|p| p.channel_id == cid && p.parent_id.is_none());
                if !valid {
                    return Ok(Err(ApiError::bad_request(
                        "Parent message not found in this channel",
                    )));
                }
            }

            if db.get_owned_files(&uid, &attachments)?.len() != attachments.len() {
                return Ok(Err(ApiError::bad_request("Unknown attachment")));
            }

            let mid = message_id.to_string();
            let parent = parent_id.map(|p| p.to_string());
            db.insert_message(&NewMessage {
                id: &mid,
                channel_id: &cid,
                user_id: &uid,
                content: &content,
                parent_id: parent.as_deref(),
                attachments: &attachments,
                created_at: &timestamp_now(),
            })?;

            match db.get_message(&mid)? {
                Some(row) => Ok(Ok(row)),
                None => Err(anyhow::anyhow!("message {} vanished after insert", mid)),
            }
        })
        .await??;

    let message = load_message(&state, row).await?;

    info!(
        "{} posted {} in channel {}",
        claims.username, message_id, channel_id
    );

    state.dispatcher.broadcast(GatewayEvent::MessageInsert {
        id: message.id,
        channel_id,
        user_id: claims.sub,
        parent_id: message.parent_id,
        created_at: message.created_at,
    });

    Ok((StatusCode::CREATED, Json(message)))
}
