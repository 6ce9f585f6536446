use crate::Database;
use crate::models::{ChannelRow, MembershipRow, WorkspaceRow};
use crate::queries::OptionalExt;
use anyhow::Result;
use rusqlite::{Connection, Transaction, params};

pub const DEFAULT_CHANNEL: &str = "general";

/// Text of the first message posted into every new channel.
pub fn welcome_message(channel_name: &str) -> String {
    format!("Welcome to the #{} channel!", channel_name)
}

impl Database {
    // -- Workspaces --

    /// Creates a workspace, the creator's admin membership, the default
    /// channel and its welcome message. All four writes commit or none do.
    pub fn create_workspace(
        &self,
        workspace_id: &str,
        name: &str,
        created_by: &str,
        channel_id: &str,
        message_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO workspaces (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![workspace_id, name, created_by, created_at],
            )?;
            tx.execute(
                "INSERT INTO workspace_members (workspace_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'admin', ?3)",
                params![workspace_id, created_by, created_at],
            )?;
            insert_channel_with_welcome(
                &tx,
                channel_id,
                workspace_id,
                DEFAULT_CHANNEL,
                created_by,
                message_id,
                created_at,
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<WorkspaceRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_by, created_at FROM workspaces WHERE id = ?1",
                [id],
                |row| {
                    Ok(WorkspaceRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_by: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Workspaces `user_id` belongs to, in the order they were joined.
    pub fn list_workspaces_for_user(&self, user_id: &str) -> Result<Vec<MembershipRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT w.id, w.name, wm.role
                 FROM workspace_members wm
                 JOIN workspaces w ON wm.workspace_id = w.id
                 WHERE wm.user_id = ?1
                 ORDER BY wm.joined_at ASC, wm.rowid ASC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(MembershipRow {
                        workspace_id: row.get(0)?,
                        name: row.get(1)?,
                        role: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Adds a member. Returns false if they already belonged to the workspace.
    pub fn add_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        role: &str,
        joined_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![workspace_id, user_id, role, joined_at],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn is_member(&self, workspace_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            exists(
                conn,
                "SELECT 1 FROM workspace_members WHERE workspace_id = ?1 AND user_id = ?2",
                &[workspace_id, user_id],
            )
        })
    }

    // -- Channels --

    /// Creates a channel and its welcome message atomically.
    pub fn create_channel(
        &self,
        channel_id: &str,
        workspace_id: &str,
        name: &str,
        created_by: &str,
        message_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_channel_with_welcome(
                &tx,
                channel_id,
                workspace_id,
                name,
                created_by,
                message_id,
                created_at,
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, workspace_id, name, created_by, created_at FROM channels WHERE id = ?1",
                [id],
                map_channel,
            )
            .optional()
        })
    }

    pub fn channel_name_taken(&self, workspace_id: &str, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            exists(
                conn,
                "SELECT 1 FROM channels WHERE workspace_id = ?1 AND name = ?2",
                &[workspace_id, name],
            )
        })
    }

    pub fn list_channels(&self, workspace_id: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workspace_id, name, created_by, created_at FROM channels
                 WHERE workspace_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map([workspace_id], map_channel)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// True when `user_id` is a member of the workspace owning `channel_id`.
    pub fn can_access_channel(&self, user_id: &str, channel_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            exists(
                conn,
                "SELECT 1 FROM channels c
                 JOIN workspace_members wm ON wm.workspace_id = c.workspace_id
                 WHERE c.id = ?1 AND wm.user_id = ?2",
                &[channel_id, user_id],
            )
        })
    }
}

fn insert_channel_with_welcome(
    tx: &Transaction<'_>,
    channel_id: &str,
    workspace_id: &str,
    name: &str,
    created_by: &str,
    message_id: &str,
    created_at: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO channels (id, workspace_id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![channel_id, workspace_id, name, created_by, created_at],
    )?;
    tx.execute(
        "INSERT INTO messages (id, channel_id, user_id, content, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
        params![message_id, channel_id, created_by, welcome_message(name), created_at],
    )?;
    Ok(())
}

fn map_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRow> {
    Ok(ChannelRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn exists(conn: &Connection, sql: &str, args: &[&str]) -> Result<bool> {
    let found = conn
        .query_row(sql, rusqlite::params_from_iter(args.iter()), |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
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

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn create_workspace_seeds_membership_channel_and_welcome() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (ws, ch, msg) = (new_id(), new_id(), new_id());

        db.create_workspace(&ws, "Acme", &alice, &ch, &msg, &timestamp_now()).unwrap();

        let memberships = db.list_workspaces_for_user(&alice).unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].name, "Acme");
        assert_eq!(memberships[0].role, "admin");

        let channels = db.list_channels(&ws).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, DEFAULT_CHANNEL);

        let welcome = db.get_message(&msg).unwrap().unwrap();
        assert_eq!(welcome.content, "Welcome to the #general channel!");
        assert!(db.can_access_channel(&alice, &ch).unwrap());
    }

    #[test]
    fn failed_workspace_creation_leaves_nothing_behind() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (ws, ch) = (new_id(), new_id());
        db.create_workspace(&ws, "Acme", &alice, &ch, &new_id(), &timestamp_now()).unwrap();

        // Reusing the channel id fails on the third write.
        let second = new_id();
        let result = db.create_workspace(&second, "Broken", &alice, &ch, &new_id(), &timestamp_now());
        assert!(result.is_err());

        assert!(db.get_workspace(&second).unwrap().is_none());
        assert!(!db.is_member(&second, &alice).unwrap());
        assert_eq!(count(&db, "workspaces"), 1);
        assert_eq!(count(&db, "workspace_members"), 1);
        assert_eq!(count(&db, "channels"), 1);
        assert_eq!(count(&db, "messages"), 1);
    }

    #[test]
    fn joining_twice_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let (ws, ch) = (new_id(), new_id());
        db.create_workspace(&ws, "Acme", &alice, &ch, &new_id(), &timestamp_now()).unwrap();

        assert!(!db.can_access_channel(&bob, &ch).unwrap());
        assert!(db.add_member(&ws, &bob, "member", &timestamp_now()).unwrap());
        assert!(!db.add_member(&ws, &bob, "member", &timestamp_now()).unwrap());
        assert!(db.can_access_channel(&bob, &ch).unwrap());

        let members = db.list_workspace_members(&ws).unwrap();
        let roles: Vec<(&str, &str)> = members
            .iter()
            .map(|m| (m.username.as_str(), m.role.as_str()))
            .collect();
        assert_eq!(roles, vec![("alice", "admin"), ("bob", "member")]);
    }

    #[test]
    fn channel_names_are_unique_per_workspace() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");
        let (ws, ch) = (new_id(), new_id());
        db.create_workspace(&ws, "Acme", &alice, &ch, &new_id(), &timestamp_now()).unwrap();

        assert!(db.channel_name_taken(&ws, "general").unwrap());
        let random = new_id();
        db.create_channel(&random, &ws, "random", &alice, &new_id(), &timestamp_now()).unwrap();
        assert!(
            db.create_channel(&new_id(), &ws, "random", &alice, &new_id(), &timestamp_now())
                .is_err()
        );

        let names: Vec<String> = db.list_channels(&ws).unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["general", "random"]);
        assert_eq!(db.get_channel(&random).unwrap().unwrap().workspace_id, ws);
    }
}
