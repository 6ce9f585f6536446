//! In-memory backend for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use parley_types::api::{SendMessageRequest, ToggleReactionResponse, UploadResponse};
use parley_types::models::{ChannelMessage, DirectMessage, UserSummary};

use crate::backend::{Backend, LocalFile};
use crate::error::ClientError;

pub fn user(name: &str) -> UserSummary {
    UserSummary {
        id: Uuid::new_v4(),
        username: name.to_string(),
        avatar_url: None,
    }
}

pub fn message(channel_id: Uuid, author: &UserSummary, content: &str) -> ChannelMessage {
    ChannelMessage {
        id: Uuid::new_v4(),
        channel_id,
        user_id: author.id,
        parent_id: None,
        content: content.to_string(),
        created_at: Utc::now(),
        user: author.clone(),
        attachments: vec![],
        reactions: vec![],
        replies: vec![],
    }
}

pub fn reply(parent: &ChannelMessage, author: &UserSummary, content: &str) -> ChannelMessage {
    ChannelMessage {
        parent_id: Some(parent.id),
        ..message(parent.channel_id, author, content)
    }
}

#[derive(Default)]
pub struct FakeState {
    /// Every stored channel message, replies included, flat.
    pub messages: Vec<ChannelMessage>,
    pub direct: Vec<DirectMessage>,
    pub reactions: HashSet<(Uuid, Uuid, String)>,
    pub uploads: Vec<String>,
    pub sends: usize,
    pub fail_uploads: HashSet<String>,
    pub fail_reads: bool,
}

pub struct FakeBackend {
    pub me: UserSummary,
    pub state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new(me: UserSummary) -> Self {
        Self {
            me,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn store(&self, message: ChannelMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    pub fn sends(&self) -> usize {
        self.state.lock().unwrap().sends
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    fn with_replies(state: &FakeState, mut top: ChannelMessage) -> ChannelMessage {
        top.replies = state
            .messages
            .iter()
            .filter(|m| m.parent_id == Some(top.id))
            .cloned()
            .collect();
        top
    }

    fn unavailable() -> ClientError {
        ClientError::Status {
            status: 503,
            message: "backend unavailable".into(),
        }
    }
}

impl Backend for FakeBackend {
    async fn list_messages(&self, channel_id: Uuid) -> Result<Vec<ChannelMessage>, ClientError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(Self::unavailable());
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.channel_id == channel_id && m.parent_id.is_none())
            .cloned()
            .map(|m| Self::with_replies(&state, m))
            .collect())
    }

    async fn get_message(&self, message_id: Uuid) -> Result<ChannelMessage, ClientError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(Self::unavailable());
        }
        let found = state.messages.iter().find(|m| m.id == message_id).cloned();
        match found {
            Some(m) if m.parent_id.is_none() => Ok(Self::with_replies(&state, m)),
            Some(m) => Ok(m),
            None => Err(ClientError::Status {
                status: 404,
                message: "Message not found".into(),
            }),
        }
    }

    async fn send_message(&self, channel_id: Uuid, req: &SendMessageRequest) -> Result<ChannelMessage, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.sends += 1;
        let mut sent = message(channel_id, &self.me, &req.content);
        sent.parent_id = req.parent_id;
        sent.attachments = req
            .attachments
            .iter()
            .map(|id| parley_types::models::Attachment {
                file_id: *id,
                file_name: "upload".into(),
                file_type: "application/octet-stream".into(),
                file_url: format!("/api/files/{}", id),
            })
            .collect();
        state.messages.push(sent.clone());
        Ok(sent)
    }

    async fn upload_file(&self, file: &LocalFile) -> Result<UploadResponse, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_uploads.contains(&file.name) {
            return Err(ClientError::Upload {
                file: file.name.clone(),
                reason: "disk full".into(),
            });
        }
        state.uploads.push(file.name.clone());
        let file_id = Uuid::new_v4();
        Ok(UploadResponse {
            file_id,
            file_name: file.name.clone(),
            file_type: file.content_type.clone(),
            file_url: format!("/api/files/{}", file_id),
            size: file.bytes.len() as u64,
        })
    }

    async fn toggle_reaction(&self, message_id: Uuid, emoji: &str) -> Result<ToggleReactionResponse, ClientError> {
        let mut state = self.state.lock().unwrap();
        let key = (message_id, self.me.id, emoji.to_string());
        let added = if state.reactions.remove(&key) {
            false
        } else {
            state.reactions.insert(key);
            true
        };
        Ok(ToggleReactionResponse { added })
    }

    async fn get_conversation(&self, user_id: Uuid) -> Result<Vec<DirectMessage>, ClientError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(Self::unavailable());
        }
        let me = self.me.id;
        Ok(state
            .direct
            .iter()
            .filter(|m| {
                (m.sender_id == me && m.receiver_id == user_id)
                    || (m.sender_id == user_id && m.receiver_id == me)
            })
            .cloned()
            .collect())
    }

    async fn get_direct_message(&self, message_id: Uuid) -> Result<DirectMessage, ClientError> {
        let state = self.state.lock().unwrap();
        state
            .direct
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
            .ok_or(ClientError::Status {
                status: 404,
                message: "Message not found".into(),
            })
    }

    async fn send_direct_message(&self, user_id: Uuid, content: &str) -> Result<DirectMessage, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.sends += 1;
        let receiver = UserSummary {
            id: user_id,
            username: "peer".into(),
            avatar_url: None,
        };
        let sent = DirectMessage {
            id: Uuid::new_v4(),
            sender_id: self.me.id,
            receiver_id: user_id,
            content: content.to_string(),
            created_at: Utc::now(),
            sender: self.me.clone(),
            receiver,
        };
        state.direct.push(sent.clone());
        Ok(sent)
    }
}
