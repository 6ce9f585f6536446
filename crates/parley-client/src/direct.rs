use std::time::Instant;

use tracing::warn;
use uuid::Uuid;

use parley_types::events::GatewayEvent;
use parley_types::models::DirectMessage;

use crate::backend::Backend;
use crate::banner::ErrorBanner;
use crate::error::ClientError;

/// An open conversation between the local user and one other user.
#[derive(Debug)]
pub struct DirectThread {
    me: Uuid,
    other: Uuid,
    messages: Vec<DirectMessage>,
}

impl DirectThread {
    pub async fn open<B: Backend>(backend: &B, me: Uuid, other: Uuid, banner: &mut ErrorBanner) -> Self {
        let messages = match backend.get_conversation(other).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to load conversation with {}: {}", other, e);
                banner.show(format!("Could not load messages: {}", e), Instant::now());
                Vec::new()
            }
        };
        Self { me, other, messages }
    }

    pub fn other(&self) -> Uuid {
        self.other
    }

    pub fn messages(&self) -> &[DirectMessage] {
        &self.messages
    }

    fn involves(&self, sender_id: Uuid, receiver_id: Uuid) -> bool {
        (sender_id == self.me && receiver_id == self.other)
            || (sender_id == self.other && receiver_id == self.me)
    }

    /// Append, or replace the copy already present with the same id.
    pub fn append(&mut self, message: DirectMessage) {
        if !self.involves(message.sender_id, message.receiver_id) {
            return;
        }
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    /// Send `content` to the other user. Blank content is a no-op and
    /// returns `false`.
    pub async fn send<B: Backend>(&mut self, backend: &B, content: &str) -> Result<bool, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(false);
        }
        let sent = backend.send_direct_message(self.other, content).await?;
        self.append(sent);
        Ok(true)
    }

    pub async fn handle_event<B: Backend>(&mut self, backend: &B, event: &GatewayEvent, banner: &mut ErrorBanner) {
        let GatewayEvent::DirectMessageInsert {
            id,
            sender_id,
            receiver_id,
            ..
        } = event
        else {
            return;
        };
        if !self.involves(*sender_id, *receiver_id) || self.messages.iter().any(|m| m.id == *id) {
            return;
        }

        match backend.get_direct_message(*id).await {
            Ok(message) => self.append(message),
            Err(e) => {
                warn!("Failed to fetch direct message {}: {}", id, e);
                banner.show(format!("Could not load new message: {}", e), Instant::now());
            }
        }
    }
}
