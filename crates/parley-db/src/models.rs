//! Database row types. These map directly to SQLite rows and stay distinct
//! from the parley-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub employer: Option<String>,
    pub created_at: String,
}

pub struct MemberRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: String,
    pub role: String,
}

pub struct WorkspaceRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: String,
}

pub struct MembershipRow {
    pub workspace_id: String,
    pub name: String,
    pub role: String,
}

pub struct ChannelRow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: String,
}

/// A message joined with its author.
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: String,
}

pub struct AttachmentRow {
    pub message_id: String,
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
}

pub struct FileRow {
    pub id: String,
    pub owner_id: String,
    pub storage_name: String,
    pub file_name: String,
    pub file_type: String,
    pub size: i64,
    pub sha256: String,
    pub created_at: String,
}

/// A direct message joined with both participants.
pub struct DirectMessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_avatar_url: Option<String>,
    pub receiver_id: String,
    pub receiver_username: String,
    pub receiver_avatar_url: Option<String>,
    pub content: String,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

pub struct SearchRow {
    pub message_id: String,
    pub channel_id: String,
    pub content: String,
    pub sender: String,
    pub created_at: String,
}

/// Fields of a message insert. Attachments are file ids in display order.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub channel_id: &'a str,
    pub user_id: &'a str,
    pub content: &'a str,
    pub parent_id: Option<&'a str>,
    pub attachments: &'a [String],
    pub created_at: &'a str,
}

/// Partial profile update; `None` keeps the stored value.
#[derive(Default)]
pub struct ProfileUpdate<'a> {
    pub username: Option<&'a str>,
    pub avatar_url: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub bio: Option<&'a str>,
    pub employer: Option<&'a str>,
}
