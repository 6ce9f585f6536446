use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::UserStatus;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Per-connection state shared between the send and receive halves.
struct ConnectionContext {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    conn_id: Uuid,
    user_id: Uuid,
    username: String,
    /// Channels whose change feed this connection receives.
    subscriptions: Subscriptions,
    /// Channels this connection last reported as typing in.
    typing: Mutex<HashSet<Uuid>>,
}

/// Server-side change-feed filter: channel-scoped events are only forwarded
/// to connections subscribed to that channel.
pub fn should_forward(event: &GatewayEvent, subscriptions: &HashSet<Uuid>) -> bool {
    match event.channel_id() {
        Some(channel_id) => subscriptions.contains(&channel_id),
        None => !matches!(event, GatewayEvent::DirectMessageInsert { .. }),
    }
}

/// Handle a WebSocket connection whose JWT was validated at the HTTP upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn_id, user_rx) = dispatcher.register_connection(user_id).await;

    let ctx = Arc::new(ConnectionContext {
        dispatcher: dispatcher.clone(),
        db,
        conn_id,
        user_id,
        username: username.clone(),
        subscriptions: Arc::new(RwLock::new(HashSet::new())),
        typing: Mutex::new(HashSet::new()),
    });

    // Subscribe before tracking so this client receives its own presence sync.
    let broadcast_rx = dispatcher.subscribe();
    dispatcher
        .track(conn_id, user_id, username.clone(), UserStatus::Online)
        .await;
    persist_status(&ctx.db, user_id, UserStatus::Online).await;

    run_connection_loop(sender, receiver, broadcast_rx, user_rx, ctx.clone()).await;

    // Nobody else will ever send "stopped typing" for this connection.
    let stale_typing: Vec<Uuid> = ctx
        .typing
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for channel_id in stale_typing {
        dispatcher.broadcast(GatewayEvent::TypingUpdate {
            channel_id,
            user_id,
            is_typing: false,
        });
    }

    dispatcher.untrack(conn_id).await;
    dispatcher.unregister_connection(user_id, conn_id).await;
    if !dispatcher.is_connected(user_id).await {
        persist_status(&ctx.db, user_id, UserStatus::Offline).await;
    }

    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: tokio::sync::broadcast::Receiver<GatewayEvent>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>,
    ctx: Arc<ConnectionContext>,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let send_subscriptions = ctx.subscriptions.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let forward = {
                        let subs = send_subscriptions
                            .read()
                            .unwrap_or_else(PoisonError::into_inner);
                        should_forward(&event, &subs)
                    };
                    if forward && send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_ctx, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_ctx.username,
                            recv_ctx.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_command(ctx: &ConnectionContext, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Subscribe { channel_ids } => {
            let allowed = accessible_channels(ctx, channel_ids).await;
            info!(
                "{} ({}) subscribing to {} channels",
                ctx.username,
                ctx.user_id,
                allowed.len()
            );
            ctx.subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(allowed);
        }

        GatewayCommand::Unsubscribe { channel_ids } => {
            let mut subs = ctx
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for channel_id in &channel_ids {
                subs.remove(channel_id);
            }
        }

        GatewayCommand::Track { status } => {
            ctx.dispatcher
                .track(ctx.conn_id, ctx.user_id, ctx.username.clone(), status)
                .await;
            persist_status(&ctx.db, ctx.user_id, status).await;
        }

        GatewayCommand::SetTyping {
            channel_id,
            is_typing,
        } => {
            let subscribed = ctx
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&channel_id);
            if !subscribed {
                debug!(
                    "{} ({}) typing in unsubscribed channel {}, ignored",
                    ctx.username, ctx.user_id, channel_id
                );
                return;
            }

            {
                let mut typing = ctx.typing.lock().unwrap_or_else(PoisonError::into_inner);
                if is_typing {
                    typing.insert(channel_id);
                } else {
                    typing.remove(&channel_id);
                }
            }

            ctx.dispatcher.broadcast(GatewayEvent::TypingUpdate {
                channel_id,
                user_id: ctx.user_id,
                is_typing,
            });
        }
    }
}

/// Drop channels the user may not read. Lookup failures deny.
async fn accessible_channels(ctx: &ConnectionContext, channel_ids: Vec<Uuid>) -> Vec<Uuid> {
    let db = ctx.db.clone();
    let user_id = ctx.user_id;
    let requested = channel_ids.clone();

    let result = tokio::task::spawn_blocking(move || {
        let uid = user_id.to_string();
        let mut allowed = Vec::with_capacity(requested.len());
        for channel_id in requested {
            if db.can_access_channel(&uid, &channel_id.to_string())? {
                allowed.push(channel_id);
            }
        }
        Ok::<_, anyhow::Error>(allowed)
    })
    .await;

    match result {
        Ok(Ok(allowed)) => {
            if allowed.len() < channel_ids.len() {
                warn!(
                    "{} ({}) denied {} of {} channel subscriptions",
                    ctx.username,
                    ctx.user_id,
                    channel_ids.len() - allowed.len(),
                    channel_ids.len()
                );
            }
            allowed
        }
        Ok(Err(e)) => {
            error!("Channel access lookup failed: {}", e);
            vec![]
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            vec![]
        }
    }
}

/// Last-write status in the users table.
async fn persist_status(db: &Arc<Database>, user_id: Uuid, status: UserStatus) {
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.set_user_status(&user_id.to_string(), status.as_str())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to persist status for {}: {}", user_id, e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn channel_events_need_a_subscription() {
        let subscribed = Uuid::new_v4();
        let other = Uuid::new_v4();
        let subs: HashSet<Uuid> = [subscribed].into_iter().collect();

        let insert = |channel_id| GatewayEvent::MessageInsert {
            id: Uuid::new_v4(),
            channel_id,
            user_id: Uuid::new_v4(),
            parent_id: None,
            created_at: Utc::now(),
        };

        assert!(should_forward(&insert(subscribed), &subs));
        assert!(!should_forward(&insert(other), &subs));
        assert!(!should_forward(&insert(subscribed), &HashSet::new()));
    }

    #[test]
    fn presence_is_global_but_direct_messages_are_never_broadcast() {
        let subs = HashSet::new();
        assert!(should_forward(&GatewayEvent::PresenceSync { users: vec![] }, &subs));

        let dm = GatewayEvent::DirectMessageInsert {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        assert!(!should_forward(&dm, &subs));
    }
}
