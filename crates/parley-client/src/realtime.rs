use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::UserStatus;

use crate::error::ClientError;

type SubscriptionCounts = Arc<Mutex<HashMap<Uuid, usize>>>;

/// Sends commands to the gateway connection. Cheap to clone; the socket
/// closes once every handle and subscription is gone.
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    subscriptions: SubscriptionCounts,
}

impl RealtimeHandle {
    pub fn new(commands: mpsc::UnboundedSender<GatewayCommand>) -> Self {
        Self {
            commands,
            subscriptions: SubscriptionCounts::default(),
        }
    }

    pub fn send(&self, command: GatewayCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Disconnected)
    }

    /// Ask the gateway to forward `channel_id`'s events. The filter lives
    /// until every guard returned for that channel is dropped.
    pub fn subscribe(&self, channel_id: Uuid) -> Subscription {
        let mut counts = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(channel_id).or_insert(0);
        *count += 1;
        if *count == 1
            && self
                .send(GatewayCommand::Subscribe {
                    channel_ids: vec![channel_id],
                })
                .is_err()
        {
            warn!("Subscribed to {} on a closed gateway connection", channel_id);
        }
        Subscription {
            channel_id,
            commands: self.commands.clone(),
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }

    pub fn track(&self, status: UserStatus) -> Result<(), ClientError> {
        self.send(GatewayCommand::Track { status })
    }

    pub fn set_typing(&self, channel_id: Uuid, is_typing: bool) -> Result<(), ClientError> {
        self.send(GatewayCommand::SetTyping {
            channel_id,
            is_typing,
        })
    }
}

/// A live channel subscription. Guards for the same channel share one
/// gateway filter; dropping the last one unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel_id: Uuid,
    commands: mpsc::UnboundedSender<GatewayCommand>,
    subscriptions: SubscriptionCounts,
}

impl Subscription {
    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut counts = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(count) = counts.get_mut(&self.channel_id) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        counts.remove(&self.channel_id);
        // Nothing to undo if the connection is already gone.
        let _ = self.commands.send(GatewayCommand::Unsubscribe {
            channel_ids: vec![self.channel_id],
        });
    }
}

/// `http(s)://host` becomes `ws(s)://host/gateway?token=...`.
pub fn gateway_url(server: &Url, token: &str) -> Result<Url, ClientError> {
    let base = server.as_str();
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };

    let mut url = Url::parse(&ws_base)?.join("/gateway")?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Open the gateway socket. Events arrive on the returned receiver until the
/// server closes the connection.
pub async fn connect(
    server: &Url,
    token: &str,
) -> Result<(RealtimeHandle, mpsc::UnboundedReceiver<GatewayEvent>), ClientError> {
    let url = gateway_url(server, token)?;
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<GatewayCommand>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                            Ok(event) => {
                                if event_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Unrecognized gateway event: {}", e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Gateway read failed: {}", e);
                        break;
                    }
                },
                command = command_rx.recv() => match command {
                    Some(command) => {
                        let text = match serde_json::to_string(&command) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode gateway command: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                            warn!("Gateway write failed: {}", e);
                            break;
                        }
                    }
                    None => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
        debug!("Gateway connection closed");
    });

    Ok((RealtimeHandle::new(command_tx), event_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_switches_scheme_and_carries_token() {
        let secure = Url::parse("https://chat.example.com").unwrap();
        assert_eq!(
            gateway_url(&secure, "abc").unwrap().as_str(),
            "wss://chat.example.com/gateway?token=abc"
        );

        let local = Url::parse("http://127.0.0.1:3210/").unwrap();
        assert_eq!(
            gateway_url(&local, "a b").unwrap().as_str(),
            "ws://127.0.0.1:3210/gateway?token=a+b"
        );
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = RealtimeHandle::new(tx);
        let channel_id = Uuid::new_v4();

        let subscription = handle.subscribe(channel_id);
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayCommand::Subscribe { channel_ids: vec![channel_id] }
        );
        assert!(rx.try_recv().is_err());

        drop(subscription);
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayCommand::Unsubscribe { channel_ids: vec![channel_id] }
        );
    }

    #[test]
    fn overlapping_subscriptions_share_one_filter() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = RealtimeHandle::new(tx);
        let channel_id = Uuid::new_v4();

        let first = handle.subscribe(channel_id);
        let second = handle.clone().subscribe(channel_id);
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayCommand::Subscribe { channel_ids: vec![channel_id] }
        );
        assert!(rx.try_recv().is_err());

        // Re-activating a channel drops the old guard after taking the new one.
        drop(first);
        assert!(rx.try_recv().is_err());

        drop(second);
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayCommand::Unsubscribe { channel_ids: vec![channel_id] }
        );

        let _again = handle.subscribe(channel_id);
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayCommand::Subscribe { channel_ids: vec![channel_id] }
        );
    }

    #[test]
    fn closed_connection_reports_disconnected() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = RealtimeHandle::new(tx);
        assert!(matches!(
            handle.track(UserStatus::Away),
            Err(ClientError::Disconnected)
        ));
    }
}
