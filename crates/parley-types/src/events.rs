use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PresenceState, UserStatus};

/// Events sent over the WebSocket gateway.
///
/// Insert events mirror a change-feed row: they carry ids only, and clients
/// re-fetch the joined row over REST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A channel message (top-level or reply) was inserted
    MessageInsert {
        id: Uuid,
        channel_id: Uuid,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        created_at: DateTime<Utc>,
    },

    /// A direct message was inserted; only delivered to its two participants
    DirectMessageInsert {
        id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        created_at: DateTime<Utc>,
    },

    ReactionAdd {
        channel_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        channel_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// Full presence set, sent on every track/untrack
    PresenceSync { users: Vec<PresenceState> },

    /// Best-effort typing signal
    TypingUpdate {
        channel_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
}

impl GatewayEvent {
    /// Returns the channel_id if this event is scoped to a specific channel.
    /// Events that return `None` are global (or targeted) and skip channel filtering.
    pub fn channel_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageInsert { channel_id, .. }
            | Self::ReactionAdd { channel_id, .. }
            | Self::ReactionRemove { channel_id, .. }
            | Self::TypingUpdate { channel_id, .. } => Some(*channel_id),
            Self::Ready { .. } | Self::DirectMessageInsert { .. } | Self::PresenceSync { .. } => {
                None
            }
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Add channels to this connection's change-feed filter.
    Subscribe { channel_ids: Vec<Uuid> },

    /// Remove channels from this connection's filter.
    Unsubscribe { channel_ids: Vec<Uuid> },

    /// Update the presence status tracked for this connection.
    Track { status: UserStatus },

    /// Typing started or stopped in a channel
    SetTyping { channel_id: Uuid, is_typing: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_tagged_wire_format() {
        let channel_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = GatewayEvent::TypingUpdate {
            channel_id,
            user_id,
            is_typing: true,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TypingUpdate");
        assert_eq!(json["data"]["is_typing"], true);
        assert_eq!(event.channel_id(), Some(channel_id));
    }

    #[test]
    fn presence_and_direct_messages_are_not_channel_scoped() {
        let sync = GatewayEvent::PresenceSync { users: vec![] };
        assert_eq!(sync.channel_id(), None);

        let dm = GatewayEvent::DirectMessageInsert {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        assert_eq!(dm.channel_id(), None);
    }

    #[test]
    fn parses_subscribe_command() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"Subscribe","data":{{"channel_ids":["{}"]}}}}"#, id);
        let cmd: GatewayCommand = serde_json::from_str(&raw).unwrap();
        assert_eq!(cmd, GatewayCommand::Subscribe { channel_ids: vec![id] });
    }
}
