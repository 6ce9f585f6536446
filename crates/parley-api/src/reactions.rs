use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_db::timestamp_now;
use parley_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use parley_types::events::GatewayEvent;

use crate::convert::parse_uuid;
use crate::error::ApiError;
use crate::state::AppState;
use crate::workspaces::channel_for_member;

const MAX_EMOJI_BYTES: usize = 64;

/// Trimmed emoji, or the reason it is unacceptable.
pub fn clean_emoji(raw: &str) -> Result<&str, ApiError> {
    let emoji = raw.trim();
    if emoji.is_empty() {
        return Err(ApiError::bad_request("Emoji is required"));
    }
    if emoji.len() > MAX_EMOJI_BYTES {
        return Err(ApiError::bad_request("Emoji is too long"));
    }
    Ok(emoji)
}

/// POST /api/messages/{message_id}/reactions: add the caller's reaction, or
/// remove it if already present.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ApiError> {
    let emoji = clean_emoji(&req.emoji)?.to_string();

    let message = state
        .run_db(move |db| db.get_message(&message_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    let channel_id = parse_uuid(&message.channel_id, "message channel_id");
    channel_for_member(&state, claims.sub, channel_id).await?;

    let user_id = claims.sub;
    let stored = emoji.clone();
    let added = state
        .run_db(move |db| {
            db.toggle_reaction(
                &message_id.to_string(),
                &user_id.to_string(),
                &stored,
                &timestamp_now(),
            )
        })
        .await?;

    let event = if added {
        GatewayEvent::ReactionAdd {
            channel_id,
            message_id,
            user_id,
            emoji,
        }
    } else {
        GatewayEvent::ReactionRemove {
            channel_id,
            message_id,
            user_id,
            emoji,
        }
    };
    state.dispatcher.broadcast(event);

    Ok(Json(ToggleReactionResponse { added }))
}
