//! Row -> API model conversion. Stored ids and timestamps are trusted but
//! still parsed defensively: a corrupt value is logged and defaulted rather
//! than failing the whole response.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::models::{
    AttachmentRow, ChannelRow, DirectMessageRow, MemberRow, MembershipRow, MessageRow,
    ReactionRow, SearchRow, UserRow, WorkspaceRow,
};
use parley_types::api::ReactionGroup;
use parley_types::models::{
    Attachment, Channel, ChannelMessage, DirectMessage, MemberRole, MemberSummary, SearchResult,
    UserProfile, UserStatus, UserSummary, Workspace, WorkspaceMembership,
};

pub fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_ts(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        DateTime::default()
    })
}

fn parse_status(raw: &str) -> UserStatus {
    raw.parse().unwrap_or_else(|e| {
        warn!("{}", e);
        UserStatus::Offline
    })
}

fn parse_role(raw: &str) -> MemberRole {
    raw.parse().unwrap_or_else(|e| {
        warn!("{}", e);
        MemberRole::Member
    })
}

pub fn file_url(file_id: &str) -> String {
    format!("/api/files/{}", file_id)
}

pub fn user_profile(row: UserRow) -> UserProfile {
    UserProfile {
        id: parse_uuid(&row.id, "user id"),
        status: parse_status(&row.status),
        created_at: parse_ts(&row.created_at, "user created_at"),
        email: row.email,
        username: row.username,
        avatar_url: row.avatar_url,
        phone: row.phone,
        bio: row.bio,
        employer: row.employer,
    }
}

pub fn member(row: MemberRow) -> MemberSummary {
    MemberSummary {
        id: parse_uuid(&row.id, "member id"),
        status: parse_status(&row.status),
        role: parse_role(&row.role),
        username: row.username,
        email: row.email,
        avatar_url: row.avatar_url,
    }
}

pub fn workspace(row: WorkspaceRow) -> Workspace {
    Workspace {
        id: parse_uuid(&row.id, "workspace id"),
        created_by: parse_uuid(&row.created_by, "workspace created_by"),
        created_at: parse_ts(&row.created_at, "workspace created_at"),
        name: row.name,
    }
}

pub fn membership(row: MembershipRow) -> WorkspaceMembership {
    WorkspaceMembership {
        id: parse_uuid(&row.workspace_id, "workspace id"),
        role: parse_role(&row.role),
        name: row.name,
    }
}

pub fn channel(row: ChannelRow) -> Channel {
    Channel {
        id: parse_uuid(&row.id, "channel id"),
        workspace_id: parse_uuid(&row.workspace_id, "channel workspace_id"),
        created_by: parse_uuid(&row.created_by, "channel created_by"),
        created_at: parse_ts(&row.created_at, "channel created_at"),
        name: row.name,
    }
}

pub fn direct_message(row: DirectMessageRow) -> DirectMessage {
    let sender_id = parse_uuid(&row.sender_id, "dm sender_id");
    let receiver_id = parse_uuid(&row.receiver_id, "dm receiver_id");
    DirectMessage {
        id: parse_uuid(&row.id, "dm id"),
        sender_id,
        receiver_id,
        created_at: parse_ts(&row.created_at, "dm created_at"),
        content: row.content,
        sender: UserSummary {
            id: sender_id,
            username: row.sender_username,
            avatar_url: row.sender_avatar_url,
        },
        receiver: UserSummary {
            id: receiver_id,
            username: row.receiver_username,
            avatar_url: row.receiver_avatar_url,
        },
    }
}

pub fn search_result(row: SearchRow) -> SearchResult {
    SearchResult {
        channel_id: parse_uuid(&row.channel_id, "search channel_id"),
        message_id: parse_uuid(&row.message_id, "search message_id"),
        timestamp: parse_ts(&row.created_at, "search created_at"),
        content: row.content,
        sender: row.sender,
    }
}

/// Group reaction rows per message, then per emoji in first-reacted order.
pub fn group_reactions(rows: Vec<ReactionRow>) -> HashMap<String, Vec<ReactionGroup>> {
    let mut grouped: HashMap<String, Vec<ReactionGroup>> = HashMap::new();
    for row in rows {
        let user_id = parse_uuid(&row.user_id, "reaction user_id");
        let groups = grouped.entry(row.message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == row.emoji) {
            Some(group) => {
                group.user_ids.push(user_id);
                group.count = group.user_ids.len();
            }
            None => groups.push(ReactionGroup {
                emoji: row.emoji,
                count: 1,
                user_ids: vec![user_id],
            }),
        }
    }
    grouped
}

pub fn group_attachments(rows: Vec<AttachmentRow>) -> HashMap<String, Vec<Attachment>> {
    let mut grouped: HashMap<String, Vec<Attachment>> = HashMap::new();
    for row in rows {
        grouped.entry(row.message_id).or_default().push(Attachment {
            file_id: parse_uuid(&row.file_id, "attachment file_id"),
            file_url: file_url(&row.file_id),
            file_name: row.file_name,
            file_type: row.file_type,
        });
    }
    grouped
}

/// Message rows plus their attachments and reactions, before threading.
pub struct MessageParts {
    pub attachments: HashMap<String, Vec<Attachment>>,
    pub reactions: HashMap<String, Vec<ReactionGroup>>,
}

impl MessageParts {
    pub fn message(&mut self, row: MessageRow) -> ChannelMessage {
        let id = parse_uuid(&row.id, "message id");
        let user_id = parse_uuid(&row.user_id, "message user_id");
        ChannelMessage {
            id,
            channel_id: parse_uuid(&row.channel_id, "message channel_id"),
            user_id,
            parent_id: row
                .parent_id
                .as_deref()
                .map(|p| parse_uuid(p, "message parent_id")),
            created_at: parse_ts(&row.created_at, "message created_at"),
            user: UserSummary {
                id: user_id,
                username: row.username,
                avatar_url: row.avatar_url,
            },
            attachments: self.attachments.remove(&row.id).unwrap_or_default(),
            reactions: self.reactions.remove(&row.id).unwrap_or_default(),
            replies: vec![],
            content: row.content,
        }
    }

    /// Attach each reply to its parent, keeping both lists in the order given.
    /// Replies whose parent is not in `top_level` are dropped.
    pub fn thread(&mut self, top_level: Vec<MessageRow>, replies: Vec<MessageRow>) -> Vec<ChannelMessage> {
        let mut messages: Vec<ChannelMessage> =
            top_level.into_iter().map(|row| self.message(row)).collect();
        let index: HashMap<Uuid, usize> =
            messages.iter().enumerate().map(|(i, m)| (m.id, i)).collect();

        for row in replies {
            let reply = self.message(row);
            match reply.parent_id.and_then(|p| index.get(&p)) {
                Some(&i) => messages[i].replies.push(reply),
                None => warn!("Reply {} has no loaded parent", reply.id),
            }
        }
        messages
    }
}
