use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use parley_db::timestamp_now;
use parley_types::api::{Claims, SendDirectMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::DirectMessage;

use crate::convert;
use crate::error::ApiError;
use crate::state::AppState;

async fn ensure_user(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    state
        .run_db(move |db| db.get_user_by_id(&user_id.to_string()))
        .await?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// GET /api/dm/{user_id}: the conversation with `user_id`, both directions,
/// oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<DirectMessage>>, ApiError> {
    ensure_user(&state, other_id).await?;

    let me = claims.sub;
    let rows = state
        .run_db(move |db| db.get_conversation(&me.to_string(), &other_id.to_string()))
        .await?;
    Ok(Json(rows.into_iter().map(convert::direct_message).collect()))
}

/// POST /api/dm/{user_id}
pub async fn send_direct_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendDirectMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message content is required"));
    }
    ensure_user(&state, receiver_id).await?;

    let id = Uuid::new_v4();
    let sender_id = claims.sub;
    let row = state
        .run_db(move |db| {
            let dm_id = id.to_string();
            db.insert_direct_message(
                &dm_id,
                &sender_id.to_string(),
                &receiver_id.to_string(),
                &content,
                &timestamp_now(),
            )?;
            db.get_direct_message(&dm_id)?
                .ok_or_else(|| anyhow::anyhow!("direct message {} vanished after insert", dm_id))
        })
        .await?;
    let message = convert::direct_message(row);

    info!("{} sent direct message {} to {}", claims.username, id, receiver_id);

    let event = GatewayEvent::DirectMessageInsert {
        id,
        sender_id,
        receiver_id,
        created_at: message.created_at,
    };
    let mut delivered = state.dispatcher.send_to_user(sender_id, event.clone()).await;
    if receiver_id != sender_id {
        delivered += state.dispatcher.send_to_user(receiver_id, event).await;
    }
    debug!("Direct message {} delivered to {} connections", id, delivered);

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/dm/messages/{message_id}: one direct message, visible only to
/// its two participants.
pub async fn get_direct_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<DirectMessage>, ApiError> {
    let row = state
        .run_db(move |db| db.get_direct_message(&message_id.to_string()))
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    let me = claims.sub.to_string();
    if row.sender_id != me && row.receiver_id != me {
        return Err(ApiError::not_found("Message not found"));
    }
    Ok(Json(convert::direct_message(row)))
}
