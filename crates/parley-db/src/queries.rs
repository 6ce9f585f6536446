use crate::Database;
use crate::models::{
    AttachmentRow, DirectMessageRow, FileRow, MemberRow, MessageRow, NewMessage, ProfileUpdate,
    ReactionRow, SearchRow, UserRow,
};
use anyhow::Result;
use rusqlite::{Connection, Row, params, params_from_iter};

const USER_COLUMNS: &str =
    "id, email, username, password, avatar_url, status, phone, bio, employer, created_at";

// Author is LEFT JOINed so a dangling author id still yields a row.
const MESSAGE_SELECT: &str = "SELECT m.id, m.channel_id, m.user_id, COALESCE(u.username, 'Unknown User'),
            u.avatar_url, m.parent_id, m.content, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.user_id = u.id";

const DIRECT_MESSAGE_SELECT: &str = "SELECT d.id, d.sender_id, s.username, s.avatar_url,
            d.receiver_id, r.username, r.avatar_url, d.content, d.created_at
     FROM direct_messages d
     JOIN users s ON d.sender_id = s.id
     JOIN users r ON d.receiver_id = r.id";

const FILE_COLUMNS: &str =
    "id, owner_id, storage_name, file_name, file_type, size, sha256, created_at";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        username: &str,
        password_hash: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, username, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, email, username, password_hash, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Applies the non-`None` fields. Returns false if the user does not exist.
    pub fn update_profile(&self, id: &str, update: &ProfileUpdate<'_>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    username   = COALESCE(?2, username),
                    avatar_url = COALESCE(?3, avatar_url),
                    phone      = COALESCE(?4, phone),
                    bio        = COALESCE(?5, bio),
                    employer   = COALESCE(?6, employer)
                 WHERE id = ?1",
                params![
                    id,
                    update.username,
                    update.avatar_url,
                    update.phone,
                    update.bio,
                    update.employer
                ],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn set_user_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET status = ?2 WHERE id = ?1", (id, status))?;
            Ok(())
        })
    }

    pub fn list_workspace_members(&self, workspace_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.username, u.avatar_url, u.status, wm.role
                 FROM workspace_members wm
                 JOIN users u ON wm.user_id = u.id
                 WHERE wm.workspace_id = ?1
                 ORDER BY wm.joined_at ASC",
            )?;
            let rows = stmt
                .query_map([workspace_id], |row| {
                    Ok(MemberRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        username: row.get(2)?,
                        avatar_url: row.get(3)?,
                        status: row.get(4)?,
                        role: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Inserts a message and its attachment links in one transaction.
    pub fn insert_message(&self, message: &NewMessage<'_>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, channel_id, user_id, content, parent_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id,
                    message.channel_id,
                    message.user_id,
                    message.content,
                    message.parent_id,
                    message.created_at
                ],
            )?;
            for (position, file_id) in message.attachments.iter().enumerate() {
                tx.execute(
                    "INSERT INTO attachments (message_id, file_id, position) VALUES (?1, ?2, ?3)",
                    params![message.id, file_id, position as i64],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
            conn.query_row(&sql, [id], map_message).optional()
        })
    }

    /// Top-level messages of a channel, oldest first.
    pub fn get_top_level_messages(&self, channel_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.channel_id = ?1 AND m.parent_id IS NULL
                 ORDER BY m.created_at ASC, m.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([channel_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replies to any of the given parents, oldest first per parent.
    pub fn get_replies(&self, parent_ids: &[String]) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            query_in_batches(
                conn,
                parent_ids,
                |marks| {
                    format!(
                        "{MESSAGE_SELECT}
                         WHERE m.parent_id IN ({marks})
                         ORDER BY m.created_at ASC, m.rowid ASC"
                    )
                },
                map_message,
            )
        })
    }

    /// Batch-fetch attachments for a set of message IDs, in display order.
    pub fn get_attachments_for_messages(&self, message_ids: &[String]) -> Result<Vec<AttachmentRow>> {
        self.with_conn(|conn| {
            query_in_batches(
                conn,
                message_ids,
                |marks| {
                    format!(
                        "SELECT a.message_id, f.id, f.file_name, f.file_type
                         FROM attachments a
                         JOIN files f ON a.file_id = f.id
                         WHERE a.message_id IN ({marks})
                         ORDER BY a.message_id, a.position"
                    )
                },
                |row| {
                    Ok(AttachmentRow {
                        message_id: row.get(0)?,
                        file_id: row.get(1)?,
                        file_name: row.get(2)?,
                        file_type: row.get(3)?,
                    })
                },
            )
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if present, inserts if absent.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        created_at: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id, user_id, emoji],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![message_id, user_id, emoji, created_at],
                )?;
            }
            tx.commit()?;
            Ok(removed == 0)
        })
    }

    /// Batch-fetch reactions for a set of message IDs, oldest first per message.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            query_in_batches(
                conn,
                message_ids,
                |marks| {
                    format!(
                        "SELECT message_id, user_id, emoji, created_at FROM reactions
                         WHERE message_id IN ({marks})
                         ORDER BY created_at ASC, rowid ASC"
                    )
                },
                |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
        })
    }

    // -- Files --

    pub fn insert_file(&self, file: &FileRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (id, owner_id, storage_name, file_name, file_type, size, sha256, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    file.id,
                    file.owner_id,
                    file.storage_name,
                    file.file_name,
                    file.file_type,
                    file.size,
                    file.sha256,
                    file.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
            conn.query_row(&sql, [id], map_file).optional()
        })
    }

    /// Files from `ids` owned by `owner_id`. Missing or foreign ids are skipped.
    pub fn get_owned_files(&self, owner_id: &str, ids: &[String]) -> Result<Vec<FileRow>> {
        self.with_conn(|conn| {
            let mut files = Vec::new();
            for chunk in ids.chunks(MAX_BATCH) {
                let sql = format!(
                    "SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ? AND id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let params = std::iter::once(owner_id).chain(chunk.iter().map(String::as_str));
                let rows = stmt
                    .query_map(params_from_iter(params), map_file)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                files.extend(rows);
            }
            Ok(files)
        })
    }

    /// Uploads created before `cutoff` that no message ever referenced.
    pub fn find_unattached_files(&self, cutoff: &str) -> Result<Vec<FileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {FILE_COLUMNS} FROM files
                 WHERE created_at < ?1
                   AND NOT EXISTS (SELECT 1 FROM attachments a WHERE a.file_id = files.id)"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([cutoff], map_file)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_file_row(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Direct messages --

    pub fn insert_direct_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, sender_id, receiver_id, content, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_direct_message(&self, id: &str) -> Result<Option<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{DIRECT_MESSAGE_SELECT} WHERE d.id = ?1");
            conn.query_row(&sql, [id], map_direct_message).optional()
        })
    }

    /// Both directions of a conversation, oldest first.
    pub fn get_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{DIRECT_MESSAGE_SELECT}
                 WHERE (d.sender_id = ?1 AND d.receiver_id = ?2)
                    OR (d.sender_id = ?2 AND d.receiver_id = ?1)
                 ORDER BY d.created_at ASC, d.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_a, user_b], map_direct_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Search --

    /// Case-insensitive substring search over message content and sender name,
    /// limited to channels in workspaces `user_id` belongs to. Newest first.
    pub fn search_messages(&self, user_id: &str, query: &str, limit: u32) -> Result<Vec<SearchRow>> {
        let pattern = format!("%{}%", escape_like(query));

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.channel_id, m.content, u.username, m.created_at
                 FROM messages m
                 JOIN users u ON m.user_id = u.id
                 JOIN channels c ON m.channel_id = c.id
                 JOIN workspace_members wm ON wm.workspace_id = c.workspace_id AND wm.user_id = ?1
                 WHERE m.content LIKE ?2 ESCAPE '\\' OR u.username LIKE ?2 ESCAPE '\\'
                 ORDER BY m.created_at DESC, m.rowid DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![user_id, pattern, limit], |row| {
                    Ok(SearchRow {
                        message_id: row.get(0)?,
                        channel_id: row.get(1)?,
                        content: row.get(2)?,
                        sender: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input.
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    conn.query_row(&sql, [value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            password: row.get(3)?,
            avatar_url: row.get(4)?,
            status: row.get(5)?,
            phone: row.get(6)?,
            bio: row.get(7)?,
            employer: row.get(8)?,
            created_at: row.get(9)?,
        })
    })
    .optional()
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        user_id: row.get(2)?,
        username: row.get(3)?,
        avatar_url: row.get(4)?,
        parent_id: row.get(5)?,
        content: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_direct_message(row: &Row<'_>) -> rusqlite::Result<DirectMessageRow> {
    Ok(DirectMessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_username: row.get(2)?,
        sender_avatar_url: row.get(3)?,
        receiver_id: row.get(4)?,
        receiver_username: row.get(5)?,
        receiver_avatar_url: row.get(6)?,
        content: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        storage_name: row.get(2)?,
        file_name: row.get(3)?,
        file_type: row.get(4)?,
        size: row.get(5)?,
        sha256: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Ids bound per `IN (...)` list. SQLite refuses statements with more than
/// 32766 variables.
pub(crate) const MAX_BATCH: usize = 500;

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Run `sql_for(placeholders)` once per `MAX_BATCH` ids and concatenate the
/// rows. Ordering holds within a batch only, so callers order by columns
/// that are per-id.
fn query_in_batches<T>(
    conn: &Connection,
    ids: &[String],
    sql_for: impl Fn(&str) -> String,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for chunk in ids.chunks(MAX_BATCH) {
        let sql = sql_for(&placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(chunk.iter()), &map)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        out.extend(rows);
    }
    Ok(out)
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp_now;
    use uuid::Uuid;

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn seed_user(db: &Database, name: &str) -> String {
        let id = new_id();
        db.create_user(&id, &format!("{}@example.com", name), name, "hash", &timestamp_now())
            .unwrap();
        id
    }

    /// Workspace with one `general` channel; returns (workspace_id, channel_id).
    fn seed_workspace(db: &Database, owner: &str, name: &str) -> (String, String) {
        let workspace_id = new_id();
        let channel_id = new_id();
        db.create_workspace(&workspace_id, name, owner, &channel_id, &new_id(), &timestamp_now())
            .unwrap();
        (workspace_id, channel_id)
    }

    fn post(db: &Database, channel_id: &str, user_id: &str, content: &str, parent: Option<&str>) -> String {
        let id = new_id();
        db.insert_message(&NewMessage {
            id: &id,
            channel_id,
            user_id,
            content,
            parent_id: parent,
            attachments: &[],
            created_at: &timestamp_now(),
        })
        .unwrap();
        id
    }

    #[test]
    fn toggle_twice_restores_original_state() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (_, channel) = seed_workspace(&db, &alice, "acme");
        let msg = post(&db, &channel, &alice, "hi", None);
        let ids = vec![msg.clone()];

        assert!(db.toggle_reaction(&msg, &alice, "👍", &timestamp_now()).unwrap());
        assert!(db.toggle_reaction(&msg, &alice, "🎉", &timestamp_now()).unwrap());
        assert_eq!(db.get_reactions_for_messages(&ids).unwrap().len(), 2);

        assert!(!db.toggle_reaction(&msg, &alice, "👍", &timestamp_now()).unwrap());
        let remaining = db.get_reactions_for_messages(&ids).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].emoji, "🎉");
    }

    #[test]
    fn top_level_messages_exclude_replies_and_keep_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (_, channel) = seed_workspace(&db, &alice, "acme");

        let first = post(&db, &channel, &alice, "first", None);
        let second = post(&db, &channel, &alice, "second", None);
        let reply = post(&db, &channel, &alice, "re: first", Some(&first));

        let top: Vec<String> = db
            .get_top_level_messages(&channel)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        // The welcome message is created with the workspace.
        assert_eq!(top, vec!["Welcome to the #general channel!", "first", "second"]);

        let replies = db.get_replies(&[first.clone(), second]).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id, reply);
        assert_eq!(replies[0].parent_id.as_deref(), Some(first.as_str()));
        assert_eq!(replies[0].username, "alice");
    }

    #[test]
    fn attachments_come_back_in_position_order() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (_, channel) = seed_workspace(&db, &alice, "acme");

        let mut file_ids = Vec::new();
        for name in ["b.png", "a.pdf"] {
            let id = new_id();
            db.insert_file(&FileRow {
                id: id.clone(),
                owner_id: alice.clone(),
                storage_name: format!("{}-{}", alice, name),
                file_name: name.into(),
                file_type: "application/octet-stream".into(),
                size: 3,
                sha256: "00".into(),
                created_at: timestamp_now(),
            })
            .unwrap();
            file_ids.push(id);
        }

        let msg = new_id();
        db.insert_message(&NewMessage {
            id: &msg,
            channel_id: &channel,
            user_id: &alice,
            content: "",
            parent_id: None,
            attachments: &file_ids,
            created_at: &timestamp_now(),
        })
        .unwrap();

        let names: Vec<String> = db
            .get_attachments_for_messages(&[msg])
            .unwrap()
            .into_iter()
            .map(|a| a.file_name)
            .collect();
        assert_eq!(names, vec!["b.png", "a.pdf"]);

        // Attached files are never considered orphans.
        assert!(db.find_unattached_files("9999").unwrap().is_empty());
    }

    #[test]
    fn owned_files_skip_other_users_uploads() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let file_id = new_id();
        db.insert_file(&FileRow {
            id: file_id.clone(),
            owner_id: bob.clone(),
            storage_name: "bob-file".into(),
            file_name: "x.txt".into(),
            file_type: "text/plain".into(),
            size: 1,
            sha256: "00".into(),
            created_at: timestamp_now(),
        })
        .unwrap();

        assert!(db.get_owned_files(&alice, &[file_id.clone()]).unwrap().is_empty());
        assert_eq!(db.get_owned_files(&bob, &[file_id]).unwrap().len(), 1);
    }

    #[test]
    fn conversation_includes_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let carol = seed_user(&db, "carol");

        db.insert_direct_message(&new_id(), &alice, &bob, "hey bob", &timestamp_now()).unwrap();
        db.insert_direct_message(&new_id(), &bob, &alice, "hey alice", &timestamp_now()).unwrap();
        db.insert_direct_message(&new_id(), &carol, &alice, "unrelated", &timestamp_now()).unwrap();

        let convo = db.get_conversation(&alice, &bob).unwrap();
        let contents: Vec<&str> = convo.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hey bob", "hey alice"]);
        assert_eq!(convo[1].sender_username, "bob");
        assert_eq!(convo[1].receiver_username, "alice");
    }

    #[test]
    fn search_is_scoped_to_membership_and_escapes_wildcards() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let (_, acme) = seed_workspace(&db, &alice, "acme");
        let (_, other) = seed_workspace(&db, &bob, "other");

        post(&db, &acme, &alice, "Deploy at 100% capacity", None);
        post(&db, &acme, &alice, "deploy later", None);
        post(&db, &other, &bob, "deploy elsewhere", None);

        let hits = db.search_messages(&alice, "DEPLOY", 50).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "deploy later");

        let percent = db.search_messages(&alice, "100%", 50).unwrap();
        assert_eq!(percent.len(), 1);
        assert!(db.search_messages(&alice, "_", 50).unwrap().is_empty());

        // Bob authored the welcome message and one post in his own workspace.
        let by_sender = db.search_messages(&bob, "bob", 50).unwrap();
        assert_eq!(by_sender.len(), 2);
        assert!(by_sender.iter().all(|hit| hit.sender == "bob" && hit.channel_id == other));
    }

    #[test]
    fn profile_update_keeps_unset_fields() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");

        db.update_profile(&alice, &ProfileUpdate { bio: Some("hello"), ..Default::default() })
            .unwrap();
        db.update_profile(&alice, &ProfileUpdate { employer: Some("Acme"), ..Default::default() })
            .unwrap();
        db.set_user_status(&alice, "away").unwrap();

        let row = db.get_user_by_id(&alice).unwrap().unwrap();
        assert_eq!(row.bio.as_deref(), Some("hello"));
        assert_eq!(row.employer.as_deref(), Some("Acme"));
        assert_eq!(row.username, "alice");
        assert_eq!(row.status, "away");

        assert!(!db.update_profile(&new_id(), &ProfileUpdate::default()).unwrap());
    }

    #[test]
    fn batch_lookups_span_more_ids_than_one_statement_binds() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (_, channel) = seed_workspace(&db, &alice, "acme");

        let parents: Vec<String> = (0..MAX_BATCH * 2 + 7)
            .map(|i| post(&db, &channel, &alice, &format!("post {i}"), None))
            .collect();
        for parent in &parents {
            post(&db, &channel, &alice, "reply", Some(parent));
            db.toggle_reaction(parent, &alice, "👍", &timestamp_now()).unwrap();
        }

        assert_eq!(db.get_replies(&parents).unwrap().len(), parents.len());
        let reactions = db.get_reactions_for_messages(&parents).unwrap();
        assert_eq!(reactions.len(), parents.len());
        assert!(db.get_attachments_for_messages(&parents).unwrap().is_empty());
        assert!(db.get_replies(&[]).unwrap().is_empty());
    }

    #[test]
    fn duplicate_username_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "alice");

        let err = db
            .create_user(&new_id(), "other@example.com", "alice", "hash", &timestamp_now())
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));

        assert!(!crate::is_unique_violation(&anyhow::anyhow!("not a database error")));
    }
}
